//! Script upload command

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::Board;
use crate::script;

/// Read a local script and decide its on-board filename.
fn read_script(path: &str, name_override: Option<&str>) -> Result<(String, String)> {
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script: {path}"))?;
    let name = match name_override {
        Some(n) => n.to_string(),
        None => Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("main.py")
            .to_string(),
    };
    Ok((name, code))
}

/// Upload a local Python script into the board filesystem
pub async fn cmd_upload(
    board: Board,
    port: Option<&str>,
    baud: Option<u32>,
    file: &str,
    name: Option<&str>,
    run: bool,
) -> Result<()> {
    let (name, code) = read_script(file, name)?;

    let ctl = super::connect_board(board, port, baud).await?;

    let mut commands = script::upload_commands(&name, &code, script::DEFAULT_CHUNK_SIZE);
    if run {
        commands.push(script::execute_command(&name));
    }
    for cmd in &commands {
        ctl.send(cmd).await?;
    }
    ctl.wait_idle().await?;
    println!("Uploaded {file} ({} bytes) as {name}", code.len());

    // Large scripts can exhaust the interpreter heap; report the headroom.
    ctl.send("import gc").await?;
    ctl.get(script::eval_commands("gc.mem_free()")).await?;
    let reply = ctl.wait_board_response().await?;
    println!("Free memory: {} bytes", reply.value);

    Ok(())
}
