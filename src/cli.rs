//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use crate::views::StreamAction;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// viewkit view engine CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: viewkit.toml)
    #[arg(short = 'C', long, default_value = "viewkit.toml")]
    pub config: PathBuf,

    /// Views directory path (relative to project root)
    #[arg(long)]
    pub views: Option<PathBuf>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Shared render arguments
#[derive(clap::Args, Debug, Clone)]
pub struct DataArgs {
    /// JSON file with render data
    #[arg(short, long)]
    pub data: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the view registry and report what was found
    Check {
        /// List every page, partial and layout name
        #[arg(short, long)]
        list: bool,
    },

    /// Render one view to stdout
    Render {
        /// Logical name of the page or partial
        name: String,

        /// Layout override (short name, e.g. `alt` for `layouts/alt`)
        #[arg(short, long, conflicts_with = "skip_layout")]
        layout: Option<String>,

        /// Emit only the view's own body
        #[arg(long)]
        skip_layout: bool,

        #[command(flatten)]
        data_args: DataArgs,
    },

    /// Print a turbo stream envelope for a partial
    Stream {
        /// append, prepend, replace, update, remove, before or after
        action: StreamAction,

        /// DOM id of the target element
        target: String,

        /// Partial to render (ignored for `remove`)
        name: Option<String>,

        #[command(flatten)]
        data_args: DataArgs,
    },

    /// Serve views for preview. Reload on change automatically
    Serve {
        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// The port you should provide
        #[arg(short, long)]
        port: Option<u16>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },
}

impl Cli {
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }
}
