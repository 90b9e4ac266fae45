//! Execute and evaluate commands on the board

use anyhow::{bail, Result};

use crate::cli::Board;
use crate::script;

/// Send a statement to the board, fire-and-forget
pub async fn cmd_exec(
    board: Board,
    port: Option<&str>,
    baud: Option<u32>,
    code: &str,
) -> Result<()> {
    let ctl = super::connect_board(board, port, baud).await?;

    ctl.send(code).await?;
    // `send` only queues; stay around until the prompt has taken it.
    ctl.wait_idle().await?;

    Ok(())
}

/// Evaluate an expression on the board and print the returned value
pub async fn cmd_eval(
    board: Board,
    port: Option<&str>,
    baud: Option<u32>,
    expr: &str,
) -> Result<()> {
    let ctl = super::connect_board(board, port, baud).await?;

    ctl.get(script::eval_commands(expr)).await?;
    let reply = ctl.wait_board_response().await?;

    if reply.status != 1 {
        bail!("board reported status {} for {expr}", reply.status);
    }
    println!("{}", reply.value);

    Ok(())
}
