//! WebSerial transport for browser builds
//!
//! Browsers only expose ports the user granted through the chooser, so
//! [`WebSerialPorts`] lists previously granted ports and can prompt for a
//! new one. Reads race the stream against a `setTimeout` promise; a read
//! that loses the race stays pending and is picked up by the next call.

use super::{
    DataBits, FlowControl, FrameConfig, Parity, PortInfo, SerialCapability, StopBits, Transport,
    TransportResult,
};
use crate::error::TransportError;
use futures::future::{select, Either};
use js_sys::{Array, Object, Promise, Reflect, Uint8Array};
use maybe_async::maybe_async;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

/// Port name that asks the browser to show its chooser
pub const REQUEST_NEW_PORT: &str = "new";

// WebSerial API bindings (not yet in stable web-sys)
#[wasm_bindgen]
extern "C" {
    /// Navigator.serial
    #[wasm_bindgen(js_namespace = navigator, js_name = serial)]
    static SERIAL: Serial;

    /// Serial interface
    type Serial;

    #[wasm_bindgen(method, catch, js_name = requestPort)]
    async fn request_port(this: &Serial) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch, js_name = getPorts)]
    async fn get_ports(this: &Serial) -> Result<JsValue, JsValue>;

    /// SerialPort interface
    #[derive(Clone)]
    pub type SerialPort;

    #[wasm_bindgen(method, catch)]
    async fn open(this: &SerialPort, options: &JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch)]
    async fn close(this: &SerialPort) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = setSignals)]
    async fn set_signals(this: &SerialPort, signals: &JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, js_name = getInfo)]
    fn get_info(this: &SerialPort) -> JsValue;

    #[wasm_bindgen(method, getter)]
    fn readable(this: &SerialPort) -> Option<web_sys::ReadableStream>;

    #[wasm_bindgen(method, getter)]
    fn writable(this: &SerialPort) -> Option<web_sys::WritableStream>;

    type StreamReader;

    #[wasm_bindgen(method, js_name = read)]
    fn read(this: &StreamReader) -> Promise;

    #[wasm_bindgen(method)]
    fn cancel(this: &StreamReader) -> Promise;

    #[wasm_bindgen(method, js_name = releaseLock)]
    fn release_lock(this: &StreamReader);

    type StreamWriter;

    #[wasm_bindgen(method, catch, js_name = write)]
    async fn write_chunk(this: &StreamWriter, chunk: &JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, js_name = releaseLock)]
    fn release_writer_lock(this: &StreamWriter);
}

fn js_err(context: &str, e: JsValue) -> TransportError {
    TransportError::Io(format!("{}: {:?}", context, e))
}

/// Promise resolving after `ms` milliseconds
fn timeout_promise(ms: i32) -> Promise {
    Promise::new(&mut |resolve, _reject| {
        let scheduled = web_sys::window().map(|window| {
            window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms)
        });
        if !matches!(scheduled, Some(Ok(_))) {
            let _ = resolve.call0(&JsValue::NULL);
        }
    })
}

fn port_info(label: String, port: &SerialPort) -> PortInfo {
    let info = port.get_info();
    let field = |key: &str| {
        Reflect::get(&info, &JsValue::from_str(key))
            .ok()
            .and_then(|v| v.as_f64())
            .map(|v| v as u16)
    };
    PortInfo {
        vid: field("usbVendorId"),
        pid: field("usbProductId"),
        manufacturer: None,
        product: None,
        name: label,
    }
}

struct OpenPort {
    reader: StreamReader,
    writer: StreamWriter,
    read_buffer: Vec<u8>,
    pending: Option<Promise>,
}

/// Transport over a granted WebSerial port
pub struct WebSerialTransport {
    label: String,
    port: SerialPort,
    io: Option<OpenPort>,
}

impl WebSerialTransport {
    /// Wrap an already granted port
    pub fn new(label: impl Into<String>, port: SerialPort) -> Self {
        Self {
            label: label.into(),
            port,
            io: None,
        }
    }

    fn io_mut(&mut self) -> TransportResult<&mut OpenPort> {
        let label = &self.label;
        self.io
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(label.clone()))
    }
}

fn open_options(baud: u32, frame: FrameConfig) -> Result<Object, JsValue> {
    let options = Object::new();
    Reflect::set(&options, &"baudRate".into(), &baud.into())?;
    let data_bits: u32 = match frame.data_bits {
        DataBits::Seven => 7,
        DataBits::Eight => 8,
    };
    Reflect::set(&options, &"dataBits".into(), &data_bits.into())?;
    let stop_bits: u32 = match frame.stop_bits {
        StopBits::One => 1,
        StopBits::Two => 2,
    };
    Reflect::set(&options, &"stopBits".into(), &stop_bits.into())?;
    let parity = match frame.parity {
        Parity::None => "none",
        Parity::Even => "even",
        Parity::Odd => "odd",
    };
    Reflect::set(&options, &"parity".into(), &parity.into())?;
    let flow = match frame.flow_control {
        FlowControl::None => "none",
        FlowControl::Hardware => "hardware",
    };
    Reflect::set(&options, &"flowControl".into(), &flow.into())?;
    Ok(options)
}

fn decode_chunk(result: JsValue) -> TransportResult<Vec<u8>> {
    let done = Reflect::get(&result, &JsValue::from_str("done"))
        .map_err(|e| js_err("read result", e))?
        .as_bool()
        .unwrap_or(false);
    if done {
        return Err(TransportError::Io("Stream ended".to_string()));
    }
    let value = Reflect::get(&result, &JsValue::from_str("value"))
        .map_err(|e| js_err("read value", e))?;
    let array: Uint8Array = value
        .dyn_into()
        .map_err(|_| TransportError::Io("Value is not Uint8Array".to_string()))?;
    Ok(array.to_vec())
}

#[maybe_async(AFIT)]
impl Transport for WebSerialTransport {
    fn name(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.io.is_some()
    }

    async fn open(&mut self, baud: u32, frame: FrameConfig) -> TransportResult<()> {
        if self.io.is_some() {
            return Err(TransportError::AlreadyOpen(self.label.clone()));
        }

        let options = open_options(baud, frame).map_err(|e| js_err("open options", e))?;
        self.port
            .open(&options.into())
            .await
            .map_err(|e| TransportError::Unavailable {
                port: self.label.clone(),
                reason: format!("{:?}", e),
            })?;

        let readable = self
            .port
            .readable()
            .ok_or_else(|| TransportError::Io("Port not readable".to_string()))?;
        let reader: StreamReader = readable.get_reader().unchecked_into();
        let writable = self
            .port
            .writable()
            .ok_or_else(|| TransportError::Io("Port not writable".to_string()))?;
        let writer: StreamWriter = writable
            .get_writer()
            .map_err(|e| js_err("get writer", e))?
            .unchecked_into();

        log::info!("WebSerial port {} opened at {} baud", self.label, baud);
        self.io = Some(OpenPort {
            reader,
            writer,
            read_buffer: Vec::new(),
            pending: None,
        });
        Ok(())
    }

    async fn close(&mut self) {
        let Some(io) = self.io.take() else {
            return;
        };
        if io.pending.is_some() {
            if let Err(e) = JsFuture::from(io.reader.cancel()).await {
                log::warn!("webserial: cancelling read failed: {:?}", e);
            }
        }
        io.reader.release_lock();
        io.writer.release_writer_lock();
        if let Err(e) = self.port.close().await {
            log::warn!("webserial: closing {} failed: {:?}", self.label, e);
        }
        log::debug!("webserial: closed {}", self.label);
    }

    async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        let io = self.io_mut()?;
        let array = Uint8Array::from(data);
        io.writer
            .write_chunk(&array.into())
            .await
            .map_err(|e| js_err("write", e))
    }

    async fn receive(&mut self, len: usize, timeout_ms: u32) -> TransportResult<Vec<u8>> {
        let io = self.io_mut()?;
        let deadline = js_sys::Date::now() + timeout_ms as f64;

        while io.read_buffer.len() < len {
            let remaining = deadline - js_sys::Date::now();
            if remaining <= 0.0 {
                break;
            }
            let promise = io.pending.take().unwrap_or_else(|| io.reader.read());
            let read = JsFuture::from(promise.clone());
            let timer = JsFuture::from(timeout_promise(remaining.ceil() as i32));
            match select(Box::pin(read), Box::pin(timer)).await {
                Either::Left((result, _)) => {
                    let chunk = decode_chunk(result.map_err(|e| js_err("read", e))?)?;
                    io.read_buffer.extend_from_slice(&chunk);
                }
                Either::Right(_) => {
                    io.pending = Some(promise);
                    break;
                }
            }
        }

        let take = len.min(io.read_buffer.len());
        Ok(io.read_buffer.drain(..take).collect())
    }

    async fn set_signals(&mut self, dtr: bool, rts: bool) -> TransportResult<()> {
        if self.io.is_none() {
            return Err(TransportError::NotOpen(self.label.clone()));
        }
        let signals = Object::new();
        Reflect::set(&signals, &"dataTerminalReady".into(), &dtr.into())
            .and_then(|_| Reflect::set(&signals, &"requestToSend".into(), &rts.into()))
            .map_err(|e| js_err("signals", e))?;
        self.port
            .set_signals(&signals.into())
            .await
            .map_err(|e| {
                log::debug!("webserial: setSignals rejected: {:?}", e);
                TransportError::SignalsUnsupported
            })
    }

    async fn sleep_ms(&mut self, ms: u32) {
        let _ = JsFuture::from(timeout_promise(ms as i32)).await;
    }
}

/// Ports granted to this origin
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSerialPorts;

impl WebSerialPorts {
    async fn granted(&self) -> TransportResult<Vec<SerialPort>> {
        let ports = SERIAL
            .get_ports()
            .await
            .map_err(|e| js_err("getPorts", e))?;
        Ok(Array::from(&ports)
            .iter()
            .map(|p| p.unchecked_into::<SerialPort>())
            .collect())
    }
}

fn label_for(index: usize) -> String {
    format!("webserial-{}", index)
}

#[maybe_async(AFIT)]
impl SerialCapability for WebSerialPorts {
    type Transport = WebSerialTransport;

    async fn authorized_ports(&self) -> TransportResult<Vec<PortInfo>> {
        let ports = self.granted().await?;
        Ok(ports
            .iter()
            .enumerate()
            .map(|(i, port)| port_info(label_for(i), port))
            .collect())
    }

    async fn request_port(&self, name: &str) -> TransportResult<WebSerialTransport> {
        if name == REQUEST_NEW_PORT {
            let port: SerialPort = SERIAL
                .request_port()
                .await
                .map_err(|_| TransportError::PermissionDenied(name.to_string()))?
                .unchecked_into();
            let label = label_for(self.granted().await?.len().saturating_sub(1));
            return Ok(WebSerialTransport::new(label, port));
        }

        let ports = self.granted().await?;
        ports
            .into_iter()
            .enumerate()
            .find(|(i, _)| label_for(*i) == name)
            .map(|(_, port)| WebSerialTransport::new(name, port))
            .ok_or_else(|| TransportError::Unavailable {
                port: name.to_string(),
                reason: "not found among granted ports".to_string(),
            })
    }
}
