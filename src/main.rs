//! microrepl - Command line interface for MicroPython boards.
//!
//! Connects to ESP32/STM32 boards over USB serial, drives the firmware's
//! interactive interpreter, and provides tools for running code, reading
//! values back, uploading scripts and watching console output.

mod board;
mod channel;
mod queue;
mod reader;
mod repl;
mod controller;
mod script;
mod error;
mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Import CLI definitions and command functions
use cli::{Cli, Commands};
use commands::{
    cmd_eval, cmd_exec, cmd_info, cmd_list_ports, cmd_monitor, cmd_reset, cmd_upload,
};

#[tokio::main]
async fn main() -> Result<()> {
    // When running without a TTY (e.g., subprocess, cron, systemd),
    // stdin might block tokio's reactor. Set it to non-blocking mode.
    #[cfg(unix)]
    unsafe {
        use std::io::IsTerminal;
        use std::os::unix::io::AsRawFd;

        // Only modify stdin if it's NOT a terminal
        if !std::io::stdin().is_terminal() {
            let stdin_fd = std::io::stdin().as_raw_fd();
            let flags = libc::fcntl(stdin_fd, libc::F_GETFL, 0);
            if flags >= 0 && (flags & libc::O_NONBLOCK) == 0 {
                // stdin is blocking - make it non-blocking to prevent reactor stalls
                let _ = libc::fcntl(stdin_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
    }

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let port = cli.port.as_deref();

    match cli.command {
        Commands::Ports => {
            cmd_list_ports()?;
        }
        Commands::Info => {
            cmd_info(cli.board, port, cli.baud).await?;
        }
        Commands::Exec { code } => {
            cmd_exec(cli.board, port, cli.baud, &code).await?;
        }
        Commands::Eval { expr } => {
            cmd_eval(cli.board, port, cli.baud, &expr).await?;
        }
        Commands::Upload { file, name, run } => {
            cmd_upload(cli.board, port, cli.baud, &file, name.as_deref(), run).await?;
        }
        Commands::Monitor { timeout } => {
            cmd_monitor(cli.board, port, cli.baud, timeout).await?;
        }
        Commands::Reset => {
            cmd_reset(cli.board, port, cli.baud).await?;
        }
    }

    Ok(())
}
