// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use crate::link::{wrap_sysex, SysexAssembler, TransportLink};

/// Standard MIDI DIN baud rate
pub const MIDI_BAUD: u32 = 31250;

const MAX_MESSAGE_LEN: usize = 64 * 1024;

// ============================================================================
// Serial MIDI Link
// ============================================================================

/// Raw MIDI bytes over a serial port (DIN MIDI UART or a USB serial bridge).
pub struct SerialMidiLink {
    port: Box<dyn SerialPort>,
    assembler: SysexAssembler,
}

impl SerialMidiLink {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialMidiLink {
            port,
            assembler: SysexAssembler::new(MAX_MESSAGE_LEN),
        })
    }
}

impl TransportLink for SerialMidiLink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(&wrap_sysex(frame))?;
        self.port.flush()?;
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.port.set_timeout(timeout).map_err(io::Error::other)?;

        // a partial message stays in the assembler until the next call
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if let Some(frame) = self.assembler.push(buf[0]) {
                        return Ok(Some(frame));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Port Listing
// ============================================================================

pub fn list_ports() -> Result<Vec<String>, serialport::Error> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "{} (USB {:04x}:{:04x} {})",
                p.port_name,
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            _ => p.port_name,
        })
        .collect())
}
