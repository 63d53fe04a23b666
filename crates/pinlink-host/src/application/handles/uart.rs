//! UART handle: a byte pipe through the board's serial module.
//!
//! Outbound bytes are split into `UartTx` frames.  Inbound `UartRx` events
//! are queued by a listener and drained by [`Uart::read`].

use std::collections::VecDeque;
use std::sync::Arc;

use pinlink_core::domain::pins::UartTiming;
use pinlink_core::protocol::{Parity, StopBits, MAX_UART_CHUNK};
use pinlink_core::{Command, Event, PacketListener, PinMode};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use super::{float_pin, HandleCore};
use crate::application::resources::ClaimRequest;
use crate::application::session::SessionShared;
use crate::error::SessionError;

/// `UartRx` chunks queued for a reader that has not caught up yet.
const INBOUND_CHUNKS: usize = 64;

/// Bytes [`Uart::read`] moves out of the queue ahead of the caller.
const PENDING_LIMIT: usize = 4096;

struct RxListener {
    module: u8,
    inbound: mpsc::Sender<Vec<u8>>,
}

impl PacketListener for RxListener {
    fn on_event(&self, event: &Event) {
        if let Event::UartRx { module, data } = event {
            if *module == self.module {
                if let Err(TrySendError::Full(dropped)) = self.inbound.try_send(data.clone()) {
                    warn!(module, bytes = dropped.len(), "UART receive queue full, dropping bytes");
                }
            }
        }
    }
}

struct Inbound {
    chunks: mpsc::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// An open UART.
pub struct Uart {
    core: HandleCore,
    rx_pin: u8,
    tx_pin: u8,
    module: u8,
    inbound: Mutex<Inbound>,
}

impl Uart {
    pub(crate) async fn open(
        shared: Arc<SessionShared>,
        rx_pin: u8,
        tx_pin: u8,
        baud: u32,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, SessionError> {
        let timing = UartTiming::for_baud(baud)
            .ok_or_else(|| SessionError::invalid(format!("baud rate {baud} out of range")))?;
        let claim = shared.resources.claim(ClaimRequest {
            pins: vec![(rx_pin, PinMode::Peripheral), (tx_pin, PinMode::Peripheral)],
            uart_module: true,
            ..ClaimRequest::default()
        })?;
        let module = claim
            .uart_module()
            .ok_or_else(|| SessionError::OutOfResource("no free UART module".to_string()))?;

        let (tx, chunks) = mpsc::channel(INBOUND_CHUNKS);
        let listener = shared.listeners.register(Arc::new(RxListener {
            module,
            inbound: tx,
        }));
        let handle = Self {
            core: HandleCore::new(shared, claim, Some(listener)),
            rx_pin,
            tx_pin,
            module,
            inbound: Mutex::new(Inbound {
                chunks,
                pending: VecDeque::new(),
            }),
        };

        for command in [
            Command::UartConfig {
                module,
                rate: timing.rate,
                speed4x: timing.speed4x,
                two_stop_bits: stop_bits == StopBits::Two,
                parity,
            },
            float_pin(rx_pin),
            Command::SetPinUart {
                pin: rx_pin,
                module,
                tx: false,
                enable: true,
            },
            Command::SetPinDigitalOut {
                pin: tx_pin,
                value: true,
                open_drain: false,
            },
            Command::SetPinUart {
                pin: tx_pin,
                module,
                tx: true,
                enable: true,
            },
        ] {
            handle.core.send(command).await?;
        }
        Ok(handle)
    }

    pub fn module(&self) -> u8 {
        self.module
    }

    /// Queues `data` for transmission.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.core.claim().check()?;
        for chunk in data.chunks(MAX_UART_CHUNK) {
            self.core
                .send(Command::UartTx {
                    module: self.module,
                    data: chunk.to_vec(),
                })
                .await?;
        }
        Ok(())
    }

    /// Reads received bytes into `buf`, waiting until at least one is
    /// available.  Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] if the connection ends while
    /// nothing is buffered.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        self.core.claim().check()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inbound = self.inbound.lock().await;
        while inbound.pending.len() < PENDING_LIMIT {
            match inbound.chunks.try_recv() {
                Ok(chunk) => inbound.pending.extend(chunk),
                Err(_) => break,
            }
        }
        if inbound.pending.is_empty() {
            let connection = &self.core.shared().connection;
            if !connection.is_connected() {
                return Err(SessionError::ConnectionLost("not connected".to_string()));
            }
            let chunk = tokio::select! {
                chunk = inbound.chunks.recv() => chunk.ok_or_else(|| SessionError::invalid("handle is closed"))?,
                _ = connection.closed() => {
                    return Err(SessionError::ConnectionLost("connection ended during read".to_string()));
                }
            };
            inbound.pending.extend(chunk);
        }

        let n = buf.len().min(inbound.pending.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    /// Shuts the module down, floats both pins and frees everything.
    /// Idempotent.
    pub async fn close(&self) {
        self.core
            .close_with(vec![
                Command::UartClose {
                    module: self.module,
                },
                Command::SetPinUart {
                    pin: self.rx_pin,
                    module: self.module,
                    tx: false,
                    enable: false,
                },
                Command::SetPinUart {
                    pin: self.tx_pin,
                    module: self.module,
                    tx: true,
                    enable: false,
                },
                float_pin(self.rx_pin),
                float_pin(self.tx_pin),
            ])
            .await;
    }
}
