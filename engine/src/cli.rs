//! CLI interface for Lorekeeper
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines the commands and global flags for exercising the plugin host.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lorekeeper plugin host
///
/// Loads sandboxed worldbuilding plugins, checks them against their
/// manifests and delivers host events to them.
#[derive(Parser, Debug)]
#[command(name = "lorekeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a manifest and show the facades it grants
    Check {
        /// Path to the manifest JSON file
        manifest: PathBuf,
    },

    /// Load a single plugin, optionally fire a hook, then unload it
    Load {
        /// Plugin source (.wasm or .wat)
        source: PathBuf,

        /// Path to the manifest JSON file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Hook to fire after loading (export or event name)
        #[arg(long, value_name = "NAME")]
        hook: Option<String>,

        /// JSON arguments passed to the hook
        #[arg(long, value_name = "JSON", requires = "hook")]
        args: Option<String>,
    },

    /// Load every plugin in a directory and fire the world-loaded hook
    Run {
        /// Plugins directory (defaults to plugins.dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// World id passed to the world-loaded hook
        #[arg(long, default_value = "default")]
        world: String,
    },
}
