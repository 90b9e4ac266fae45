//! System commands

use std::time::Duration;

use anyhow::{bail, Result};

use crate::cli::Board;
use crate::script;

/// Query and print interpreter/firmware identity
pub async fn cmd_info(board: Board, port: Option<&str>, baud: Option<u32>) -> Result<()> {
    let ctl = super::connect_board(board, port, baud).await?;

    ctl.send("import os").await?;
    ctl.get(script::eval_commands("list(os.uname())")).await?;
    let reply = ctl.wait_board_response().await?;

    let Some(fields) = reply.value.as_array() else {
        bail!("unexpected uname payload: {}", reply.value);
    };
    let field = |i: usize| {
        fields
            .get(i)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };

    println!("Board Information:");
    println!("  System:   {}", field(0));
    println!("  Release:  {}", field(2));
    println!("  Version:  {}", field(3));
    println!("  Machine:  {}", field(4));

    Ok(())
}

/// Reboot the interpreter
pub async fn cmd_reset(board: Board, port: Option<&str>, baud: Option<u32>) -> Result<()> {
    let ctl = super::connect_board(board, port, baud).await?;

    for cmd in script::reset_commands() {
        ctl.send(&cmd).await?;
    }
    // The board drops off the bus mid-reboot; don't insist on a prompt.
    let _ = tokio::time::timeout(Duration::from_secs(5), ctl.wait_idle()).await;

    println!("Device rebooting...");
    Ok(())
}
