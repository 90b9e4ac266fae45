//! CLI argument definitions using clap

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "microrepl")]
#[command(author, version, about = "MicroPython board REPL driver", long_about = None)]
pub struct Cli {
    /// Board family to talk to
    #[arg(short = 'B', long, value_enum, default_value = "esp32", global = true)]
    pub board: Board,

    /// Serial port device (e.g., /dev/ttyUSB0 on Linux, COM3 on Windows);
    /// auto-detected from the board's USB filters when omitted
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate override (defaults to the board profile's rate)
    #[arg(short, long, global = true)]
    pub baud: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available serial ports
    Ports,

    /// Show interpreter and firmware identity
    Info,

    /// Send a statement to the board without waiting for a result
    Exec {
        /// MicroPython statement (e.g., "machine.Pin(2, machine.Pin.OUT).on()")
        code: String,
    },

    /// Evaluate an expression on the board and print its value
    Eval {
        /// MicroPython expression (e.g., "machine.Pin(2).value()")
        expr: String,
    },

    /// Upload a local Python script into the board filesystem
    Upload {
        /// Local script path
        file: String,

        /// Destination filename on the board (defaults to the local name)
        #[arg(short, long)]
        name: Option<String>,

        /// Execute the script after uploading
        #[arg(short, long)]
        run: bool,
    },

    /// Stream the board's console output
    Monitor {
        /// Timeout in seconds (0 = until Ctrl-C)
        #[arg(short, long, default_value = "0")]
        timeout: u64,
    },

    /// Reboot the interpreter
    Reset,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Board {
    Esp32,
    Stm32,
}

impl Board {
    /// Resolve to the static profile for this family.
    pub fn profile(self) -> crate::board::BoardProfile {
        match self {
            Board::Esp32 => crate::board::ESP32,
            Board::Stm32 => crate::board::STM32,
        }
    }
}
