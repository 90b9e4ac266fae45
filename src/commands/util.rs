//! Utility commands

use anyhow::Result;

use crate::board;

/// List available serial ports, marking the ones a board profile claims
pub fn cmd_list_ports() -> Result<()> {
    println!("Available serial ports:\n");

    let ports = serialport::available_ports()?;

    if ports.is_empty() {
        println!("  No serial ports found");
        return Ok(());
    }

    for port in ports {
        print!("  {} ", port.port_name);

        if let serialport::SerialPortType::UsbPort(info) = port.port_type {
            print!("(USB {:04x}:{:04x}", info.vid, info.pid);
            if let Some(product) = info.product {
                print!(" - {product}");
            }
            for profile in [&board::ESP32, &board::STM32] {
                if profile.matches(info.vid, info.pid) {
                    print!(" [{}]", profile.name);
                }
            }
            print!(")");
        }

        println!();
    }

    Ok(())
}
