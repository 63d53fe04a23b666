//! USB/UART serial transport.

use std::io;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::{BoxedTransport, TransportBootstrap};

/// Opens a serial device (`/dev/ttyACM0`, `COM3`, ...) at a fixed baud rate.
#[derive(Debug, Clone)]
pub struct SerialBootstrap {
    path: String,
    baud: u32,
}

impl SerialBootstrap {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }
}

#[async_trait]
impl TransportBootstrap for SerialBootstrap {
    async fn open(&self) -> io::Result<BoxedTransport> {
        debug!(path = %self.path, baud = self.baud, "opening serial port");
        let port = tokio_serial::new(&self.path, self.baud)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud)
    }
}
