//! upack - universal package installer
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Installs versioned packages from a feed into a directory, keeping a local
//! registry of downloaded artifacts so reinstalls skip the network.
//!
//! # Registry Layout
//!
//! ```text
//! ~/.upack/                     (--userregistry, or UPACK_USER_REGISTRY)
//! /var/lib/upack/               (machine, or UPACK_MACHINE_REGISTRY)
//! ├── installedPackages.json
//! ├── packageCache/<group$name>/<name>.<version>.upack
//! ├── locks/
//! └── tmp/
//! ```

pub mod cmd;
pub mod ui;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use upack_schema::RegistryScope;

#[derive(Debug, Parser)]
#[command(name = "upack")]
#[command(author, version, about = "upack - install universal packages from a feed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download a package and extract it into a directory
    Install(InstallArgs),
    /// List packages recorded in the registry
    List {
        /// Use the per-user registry instead of the machine registry
        #[arg(long)]
        userregistry: bool,
    },
    /// Remove temp files left by interrupted downloads
    Clean {
        /// Use the per-user registry instead of the machine registry
        #[arg(long)]
        userregistry: bool,
    },
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Package to install: name or group:name
    pub package: String,

    /// Version to install (default: latest stable)
    pub version: Option<String>,

    /// Feed URL, e.g. https://proget.example/upack/Main
    #[arg(long, env = "UPACK_SOURCE")]
    pub source: String,

    /// Directory to extract the package into
    #[arg(long)]
    pub target: PathBuf,

    /// Feed credentials as user:password
    #[arg(long, env = "UPACK_USER", hide_env_values = true)]
    pub user: Option<String>,

    /// Replace files that already exist in the target
    #[arg(long)]
    pub overwrite: bool,

    /// Consider prerelease versions when resolving latest
    #[arg(long)]
    pub prerelease: bool,

    /// Comment recorded in the registry
    #[arg(long)]
    pub comment: Option<String>,

    /// Use the per-user registry instead of the machine registry
    #[arg(long, conflicts_with = "unregistered")]
    pub userregistry: bool,

    /// Do not use or record anything in a registry
    #[arg(long)]
    pub unregistered: bool,
}

/// Registry scope selected by `--userregistry`.
pub fn scope(userregistry: bool) -> RegistryScope {
    if userregistry {
        RegistryScope::User
    } else {
        RegistryScope::Machine
    }
}
