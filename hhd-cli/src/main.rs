//! Handheld Daemon.
//!
//! # Usage
//!
//! ```text
//! hhd [--user <USER>]
//! ```
//!
//! Without `--user` the invoking user's home anchors the configuration
//! root (`$HHD_CONFIG_DIR`, else `~/.config/hhd`).

mod registry;

use anyhow::{Context as _, Result};
use clap::Parser;

use hhd_core::Context;
use hhd_daemon::{start_blocking, DaemonOptions, PluginManager};

#[derive(Parser, Debug)]
#[command(
    name = "hhd",
    version,
    about = "Handheld Daemon: reconciles device plugins with a persistent configuration",
    long_about = None,
)]
struct Cli {
    /// User whose home holds the configuration and who owns written files.
    #[arg(short, long)]
    user: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let context = match cli.user.as_deref() {
        Some(user) => Context::for_user(user),
        None => Context::current(),
    };
    let Some(context) = context else {
        eprintln!("Could not get user information. Exiting...");
        return Ok(());
    };

    let options = DaemonOptions::for_context(context);
    let plugins = PluginManager::from_providers(registry::PROVIDERS);
    start_blocking(options, plugins, None).context("daemon exited with error")
}
