//! burrow - isolated Python environment and package manager.
//!
//! Thin command surface over [`burrow_core`]: create an environment,
//! install and uninstall packages inside it, and list what is installed.
//! All the interesting behavior (resolution, planning, transactional
//! application) lives in the core crate.

pub mod cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "burrow")]
#[command(author, version, about = "Isolated Python environments with transactional installs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new environment
    Create {
        /// Directory to create the environment in
        path: PathBuf,
        /// Interpreter version to record (detected from the interpreter
        /// when omitted)
        #[arg(long)]
        python_version: Option<String>,
    },
    /// Install packages into an environment
    Install {
        /// Environment directory
        path: PathBuf,
        /// Requirements, e.g. `requests` or `requests==2.31` or `foo>=1.0,<2.0`
        #[arg(required = true)]
        specs: Vec<String>,
        /// Package index to resolve against
        #[arg(long, env = "BURROW_INDEX_URL")]
        index_url: Option<String>,
    },
    /// Remove packages from an environment
    Uninstall {
        /// Environment directory
        path: PathBuf,
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
        /// Package index consulted for removal ordering
        #[arg(long, env = "BURROW_INDEX_URL")]
        index_url: Option<String>,
    },
    /// List installed packages, one `name==version` per line
    List {
        /// Environment directory
        path: PathBuf,
    },
}
