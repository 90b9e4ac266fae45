//! Board profiles.
//!
//! The ESP32 and STM32 boards speak the same line-oriented MicroPython REPL
//! protocol; everything that actually differs between them (USB identity,
//! baud rate, prompt and marker conventions) lives here as data so a single
//! session/controller implementation serves both.

/// USB vendor/product pair used to restrict device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Static description of one supported board family.
#[derive(Debug, Clone, Copy)]
pub struct BoardProfile {
    /// Short name used in logs and errors.
    pub name: &'static str,
    /// Serial baud rate.
    pub baud: u32,
    /// USB devices that may be selected for this board.
    pub filters: &'static [UsbFilter],
    /// Interpreter prompt that marks the device as idle.
    pub prompt: &'static str,
    /// Out-of-band byte sequence that forces the interpreter back to its
    /// prompt (Ctrl-C).
    pub interrupt: &'static str,
    /// Line terminator appended to every transmitted command.
    pub line_ending: &'static str,
    /// JSON key that distinguishes a structured reply line from ordinary
    /// console output.
    pub response_tag: &'static str,
    /// Marker that starts a firmware traceback.
    pub traceback_marker: &'static str,
    /// Marker that signals the interpreter regained control after an error.
    pub recovery_marker: &'static str,
}

// USB-SERIAL CH340
const CH340: UsbFilter = UsbFilter {
    vendor_id: 0x1a86,
    product_id: 0x7523,
};
// Silicon Labs CP210x USB to UART Bridge
const CP210X: UsbFilter = UsbFilter {
    vendor_id: 0x10c4,
    product_id: 0xea60,
};
// ST Nucleo WB55 running MicroPython
const NUCLEO_WB55: UsbFilter = UsbFilter {
    vendor_id: 0xf055,
    product_id: 0x9800,
};

/// ESP32 dev boards behind a CH340 or CP210x bridge.
pub const ESP32: BoardProfile = BoardProfile {
    name: "esp32",
    baud: 115_200,
    filters: &[CH340, CP210X],
    prompt: ">>> ",
    interrupt: "\x03",
    line_ending: "\r\n",
    response_tag: "cmd",
    traceback_marker: "Traceback",
    recovery_marker: "KeyboardInterrupt",
};

/// STM32 Nucleo WB55 with native USB.
pub const STM32: BoardProfile = BoardProfile {
    name: "stm32",
    baud: 115_200,
    filters: &[NUCLEO_WB55],
    prompt: ">>> ",
    interrupt: "\x03",
    line_ending: "\r\n",
    response_tag: "cmd",
    traceback_marker: "Traceback",
    recovery_marker: "KeyboardInterrupt",
};

impl BoardProfile {
    /// True if the given USB identity matches one of this board's filters.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.filters
            .iter()
            .any(|f| f.vendor_id == vendor_id && f.product_id == product_id)
    }
}

/// Auto-detect a connected board matching the profile's USB filters.
///
/// Returns the first matching port name, or `None` if nothing is plugged in.
pub fn detect_port(profile: &BoardProfile) -> serialport::Result<Option<String>> {
    let ports = serialport::available_ports()?;

    for port in ports {
        if let serialport::SerialPortType::UsbPort(info) = port.port_type {
            if profile.matches(info.vid, info.pid) {
                tracing::debug!(
                    "matched {} ({:04x}:{:04x})",
                    port.port_name,
                    info.vid,
                    info.pid
                );
                return Ok(Some(port.port_name));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp32_matches_known_bridges() {
        assert!(ESP32.matches(0x1a86, 0x7523));
        assert!(ESP32.matches(0x10c4, 0xea60));
        assert!(!ESP32.matches(0xf055, 0x9800));
    }

    #[test]
    fn stm32_matches_nucleo_only() {
        assert!(STM32.matches(0xf055, 0x9800));
        assert!(!STM32.matches(0x1a86, 0x7523));
    }

    #[test]
    fn detect_no_panic() {
        // Should not panic even if no devices connected
        let _ = detect_port(&ESP32);
    }
}
