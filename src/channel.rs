//! Serial channel setup.
//!
//! The transport the rest of the crate sees is just an async duplex byte
//! stream; this module knows how to open the real one.

use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Open a serial port at the given baud rate, 8N1, no flow control.
pub async fn open_serial(port_name: &str, baud: u32) -> tokio_serial::Result<SerialStream> {
    use tokio_serial::SerialPort as _;

    let mut port = tokio_serial::new(port_name, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open_native_async()?;

    // Most dev boards wire DTR/RTS into the auto-reset circuit; driving
    // either low reboots the interpreter we are about to talk to. Hold both
    // high.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);

    // Native USB CDC needs longer to settle after enumeration than a
    // UART bridge does.
    let is_native_usb = port_name.contains("ttyACM") || port_name.contains("cu.usb");
    if is_native_usb {
        tokio::time::sleep(Duration::from_millis(200)).await;
    } else {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let (Ok(cts), Ok(dsr)) = (port.read_clear_to_send(), port.read_data_set_ready()) {
        tracing::debug!("serial signals: CTS={cts} DSR={dsr}");
    }

    Ok(port)
}

/// Log the USB identity of a port, if it has one.
pub fn log_port_info(port_name: &str) {
    let Ok(ports) = serialport::available_ports() else {
        return;
    };
    for port in ports {
        if port.port_name != port_name {
            continue;
        }
        if let serialport::SerialPortType::UsbPort(info) = port.port_type {
            tracing::info!(
                "using {} ({:04x}:{:04x}{})",
                port_name,
                info.vid,
                info.pid,
                info.product
                    .map(|p| format!(", {p}"))
                    .unwrap_or_default()
            );
            return;
        }
    }
    tracing::info!("using {port_name}");
}
