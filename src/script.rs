//! MicroPython command builders.
//!
//! Everything here produces plain command strings for the REPL queue:
//! uploading a script into the board's filesystem chunk by chunk, running
//! it, and wrapping an expression so the firmware prints a tagged JSON
//! reply the session can pick out of the console stream.

/// Chunk size used when writing a script to the board filesystem.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Split source text into transmission-sized chunks.
pub fn chunk(code: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = code.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Escape a chunk of source for embedding in a triple-quoted MicroPython
/// string literal: quotes and backslash escapes are protected, newlines
/// collapse to `\r`, and tabs become spaces.
pub fn adapt_chunk(code: &str) -> String {
    let code = code.replace("\\\"", "\\\\\"");
    let code = code.replace('"', "\\\"");
    let code = code.replace("\r\n", "\\r");
    let code = code.replace('\n', "\\r");
    let code = code.replace("\\t", "\\\\t");
    let code = code.replace("\\n", "\\\\n");
    let code = code.replace('\t', "  ");
    let mut code = code.replace("\\x", "\\\\x");
    // A trailing lone backslash would escape the closing triple quote.
    if code.ends_with('\\') {
        code.push('\\');
    }
    code
}

/// Command sequence that writes `code` into `filename` on the board.
pub fn upload_commands(filename: &str, code: &str, chunk_size: usize) -> Vec<String> {
    let mut commands = vec![format!("f = open('{filename}', 'w')")];
    for piece in chunk(code, chunk_size) {
        let adapted = adapt_chunk(&piece);
        commands.push(format!("buffer = \"\"\"{adapted}\"\"\""));
        commands.push("f.write(buffer)".to_string());
    }
    commands.push("f.close()".to_string());
    commands
}

/// Command that executes an uploaded script in the global namespace.
pub fn execute_command(filename: &str) -> String {
    format!("exec(open('{filename}').read(),globals())")
}

/// Commands that evaluate `expr` on the board and print the result as a
/// tagged single-line JSON reply.
///
/// Built so that no command line contains the reply marker itself; the
/// interpreter's echo of these commands must not look like a response.
pub fn eval_commands(expr: &str) -> Vec<String> {
    vec![
        "import json".to_string(),
        format!("value = {expr}"),
        "print(json.dumps({'cmd': 'eval', 'status': 1, 'value': value}))".to_string(),
    ]
}

/// Commands that reboot the interpreter.
pub fn reset_commands() -> Vec<String> {
    vec!["import machine".to_string(), "machine.reset()".to_string()]
}
