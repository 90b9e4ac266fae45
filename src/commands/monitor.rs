//! Console monitor command

use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::cli::Board;

/// Stream the board's console output to stdout
pub async fn cmd_monitor(
    board: Board,
    port: Option<&str>,
    baud: Option<u32>,
    timeout: u64,
) -> Result<()> {
    let ctl = super::connect_board(board, port, baud).await?;
    let mut output = ctl.subscribe_output();

    eprintln!("Monitoring {} console (Ctrl-C to stop)...", ctl.profile().name);

    let stream = async {
        loop {
            match output.recv().await {
                Ok(line) => println!("{line}"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("monitor fell behind, dropped {n} lines");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    if timeout > 0 {
        let _ = tokio::time::timeout(Duration::from_secs(timeout), stream).await;
    } else {
        tokio::select! {
            _ = stream => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    Ok(())
}
