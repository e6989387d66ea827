//! Native serial port transport

use super::{
    DataBits, FlowControl, FrameConfig, Parity, PortInfo, SerialCapability, StopBits, Transport,
    TransportResult,
};
use crate::error::TransportError;
use maybe_async::maybe_async;
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Timeout applied to writes
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Serial port transport backed by the `serialport` crate
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Create a closed transport for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: None,
        }
    }

    fn port_mut(&mut self) -> TransportResult<&mut Box<dyn SerialPort>> {
        let path = &self.path;
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(path.clone()))
    }
}

fn to_serialport(frame: FrameConfig) -> serialport::SerialPortBuilder {
    // Baud and path are filled in by the caller
    serialport::new("", 0)
        .data_bits(match frame.data_bits {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        })
        .parity(match frame.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        })
        .stop_bits(match frame.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        })
        .flow_control(match frame.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        })
}

#[maybe_async(AFIT)]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn open(&mut self, baud: u32, frame: FrameConfig) -> TransportResult<()> {
        if self.port.is_some() {
            return Err(TransportError::AlreadyOpen(self.path.clone()));
        }

        let port = to_serialport(frame)
            .path(&self.path)
            .baud_rate(baud)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Unavailable {
                port: self.path.clone(),
                reason: e.to_string(),
            })?;

        log::info!("Opened serial port {} at {} baud", self.path, baud);
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                log::warn!("serial: flush on close of {} failed: {}", self.path, e);
            }
            // Dropping the handle closes the device
            drop(port);
            log::debug!("serial: closed {}", self.path);
        }
    }

    async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        let port = self.port_mut()?;
        port.set_timeout(WRITE_TIMEOUT)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    async fn receive(&mut self, len: usize, timeout_ms: u32) -> TransportResult<Vec<u8>> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)?;
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }

    async fn set_signals(&mut self, dtr: bool, rts: bool) -> TransportResult<()> {
        let port = self.port_mut()?;
        port.write_data_terminal_ready(dtr)?;
        port.write_request_to_send(rts)?;
        Ok(())
    }

    async fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Every serial port known to the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

#[maybe_async(AFIT)]
impl SerialCapability for SystemPorts {
    type Transport = SerialTransport;

    async fn authorized_ports(&self) -> TransportResult<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    name: p.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                _ => PortInfo::named(p.port_name),
            })
            .collect())
    }

    async fn request_port(&self, name: &str) -> TransportResult<SerialTransport> {
        // Native ports need no grant; opening reports a missing device
        Ok(SerialTransport::new(name))
    }
}
