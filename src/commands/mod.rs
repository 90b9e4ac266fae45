//! Command implementations

pub mod exec;
pub mod monitor;
pub mod system;
pub mod upload;
pub mod util;

// Re-export command functions
pub use exec::*;
pub use monitor::*;
pub use system::*;
pub use upload::*;
pub use util::*;

use anyhow::{Context, Result};

use crate::cli::Board;
use crate::controller::DeviceController;

/// Open a controller for the selected board and bring up the REPL.
pub async fn connect_board(
    board: Board,
    port: Option<&str>,
    baud: Option<u32>,
) -> Result<DeviceController> {
    let mut profile = board.profile();
    if let Some(baud) = baud {
        profile.baud = baud;
    }

    let mut ctl = DeviceController::new(profile);
    ctl.connect(port)
        .await
        .with_context(|| format!("failed to connect to {} board", profile.name))?;
    Ok(ctl)
}
