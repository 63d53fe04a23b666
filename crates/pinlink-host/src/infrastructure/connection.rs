//! Connection lifecycle: opening the transport, verifying the board, and
//! noticing when the link goes away.
//!
//! ```text
//!                wait_for_connect
//!  Disconnected ─────────────────► Connecting ──open ok──► Connected ──handshake──► Verified
//!       ▲  ▲                           │                      │                        │
//!       │  └──────── open failed ──────┘                      │                        │
//!       │                                                     ▼                        ▼
//!       │                      EOF, read/write error, timeout, bad handshake ───────► Lost
//!       │                                                                              │
//!       └──────────── abort() ◄── Aborting ◄── abort() from Connecting/Connected/Verified
//! ```
//!
//! # How waiting works (for beginners)
//!
//! The current state lives in a single `tokio::sync::watch` channel.  Every
//! transition is a `send_if_modified` closure that checks the current value
//! and writes the new one in one step, so two tasks can never both "win" the
//! same transition.  Callers of [`Connection::wait_for_connect`] subscribe to
//! the channel and sleep until the state reaches a value they care about;
//! there is no polling and no window in which a change can be missed.
//!
//! Each attempt carries a *generation* number.  Background tasks from an old
//! attempt check it before touching shared state, so a slow task from a
//! previous connection can never mark a newer one as lost.

use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pinlink_core::protocol::PROTOCOL_VERSION;
use pinlink_core::{
    Command, DecodeOutcome, Event, FrameCodec, HandshakeInfo, ListenerRegistry, Packet,
    StreamDecoder, WireCodec,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::error::SessionError;
use crate::infrastructure::storage::config::ConnectionConfig;
use crate::infrastructure::transport::{BoxedTransport, TransportBootstrap};

/// Lifecycle state of the link to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No attempt in progress.  Initial state.
    Disconnected,
    /// The transport bootstrap is running.
    Connecting,
    /// The stream is open; waiting for the handshake.
    Connected,
    /// A compatible handshake was received.  Commands may be sent.
    Verified,
    /// `abort` is tearing the connection down.
    Aborting,
    /// The link failed.  The next `wait_for_connect` starts a fresh attempt.
    Lost,
}

impl ConnectionState {
    /// Whether an attempt is in flight or established.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Verified
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Published {
    state: ConnectionState,
    generation: u64,
}

/// Why an attempt ended, kept for the callers waiting on it.
#[derive(Debug, Clone)]
enum AttemptFailure {
    Open { kind: io::ErrorKind, message: String },
    Lost(String),
}

enum Attempt {
    AlreadyVerified,
    Aborting,
    Join(u64),
    Start(u64),
}

type Writer = WriteHalf<BoxedTransport>;

/// Owns the transport and runs the state machine.
pub struct Connection {
    bootstrap: Arc<dyn TransportBootstrap>,
    config: ConnectionConfig,
    codec: Arc<dyn FrameCodec>,
    listeners: Arc<ListenerRegistry>,
    state: watch::Sender<Published>,
    /// Write half tagged with the generation that opened it.
    writer: AsyncMutex<Option<(u64, Writer)>>,
    handshake: Mutex<Option<HandshakeInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    failure: Mutex<Option<(u64, AttemptFailure)>>,
    next_ping: AtomicU16,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn aborted() -> SessionError {
    SessionError::Aborted("connection attempt aborted".to_string())
}

impl Connection {
    /// Creates a disconnected connection speaking the default wire framing.
    pub fn new(
        bootstrap: Arc<dyn TransportBootstrap>,
        config: ConnectionConfig,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self::with_codec(bootstrap, config, listeners, Arc::new(WireCodec))
    }

    pub fn with_codec(
        bootstrap: Arc<dyn TransportBootstrap>,
        config: ConnectionConfig,
        listeners: Arc<ListenerRegistry>,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        let (state, _) = watch::channel(Published {
            state: ConnectionState::Disconnected,
            generation: 0,
        });
        Self {
            bootstrap,
            config,
            codec,
            listeners,
            state,
            writer: AsyncMutex::new(None),
            handshake: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            next_ping: AtomicU16::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Verified
    }

    /// Handshake of the current verified connection.
    pub fn handshake(&self) -> Option<HandshakeInfo> {
        lock(&self.handshake).clone()
    }

    pub fn describe(&self) -> String {
        self.bootstrap.describe()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Waits until the board is verified, starting an attempt if none is in
    /// progress.
    ///
    /// Concurrent callers share one attempt.  Returns immediately if the
    /// connection is already verified; otherwise the settle delay is observed
    /// after verification.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Aborted`] if [`Connection::abort`] runs first.
    /// - [`SessionError::TransportOpen`] if the bootstrap fails.
    /// - [`SessionError::ConnectionLost`] if the attempt ends in `Lost`.
    pub async fn wait_for_connect(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut rx = self.state.subscribe();
        let generation = match self.begin_attempt() {
            Attempt::AlreadyVerified => return Ok(()),
            Attempt::Aborting => return Err(aborted()),
            Attempt::Join(generation) => generation,
            Attempt::Start(generation) => {
                self.spawn_attempt(generation);
                generation
            }
        };

        let seen = rx
            .wait_for(|p| {
                p.generation != generation
                    || !matches!(
                        p.state,
                        ConnectionState::Connecting | ConnectionState::Connected
                    )
            })
            .await
            .map(|p| *p)
            .map_err(|_| aborted())?;

        if seen.generation != generation || seen.state != ConnectionState::Verified {
            return self.attempt_outcome(seen, generation);
        }
        self.settle(rx, generation).await
    }

    /// Tears the connection down.  Safe to call from any context at any time.
    ///
    /// Listeners hear about the disconnect only if the link was live.
    pub fn abort(&self) {
        let mut prior = ConnectionState::Disconnected;
        let changed = self.state.send_if_modified(|p| {
            prior = p.state;
            match p.state {
                s if s.is_live() => {
                    p.state = ConnectionState::Aborting;
                    true
                }
                ConnectionState::Lost => {
                    p.state = ConnectionState::Disconnected;
                    true
                }
                _ => false,
            }
        });
        if !changed {
            return;
        }

        self.stop_tasks();
        self.drop_writer_now();
        lock(&self.handshake).take();

        if prior.is_live() {
            info!(state = ?prior, "aborting connection");
            self.listeners.notify_disconnect();
            self.state.send_if_modified(|p| {
                if p.state == ConnectionState::Aborting {
                    p.state = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Resolves once the verified connection observed at call time ends.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let generation = rx.borrow().generation;
        let _ = rx
            .wait_for(|p| p.generation != generation || p.state != ConnectionState::Verified)
            .await;
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Sends one command.  Never waits for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] if the connection is not
    /// verified or the write fails (which also moves the state to `Lost`).
    pub async fn queue_packet(&self, command: Command) -> Result<(), SessionError> {
        self.send_command(command).await.map(|_| ())
    }

    /// Sends `SoftReset`, then treats the session as dropped by the board:
    /// every listener hears one disconnect.
    pub async fn soft_reset(&self) -> Result<(), SessionError> {
        let generation = self.send_command(Command::SoftReset).await?;
        info!("soft reset sent");
        self.mark_lost(generation, "soft reset");
        Ok(())
    }

    /// Sends `HardReset`.  The board reboots; the loss is detected by the
    /// receive loop like any other.
    pub async fn hard_reset(&self) -> Result<(), SessionError> {
        self.send_command(Command::HardReset).await?;
        info!("hard reset sent");
        Ok(())
    }

    async fn send_command(&self, command: Command) -> Result<u64, SessionError> {
        let current = *self.state.borrow();
        if current.state != ConnectionState::Verified {
            return Err(SessionError::ConnectionLost(format!(
                "not connected ({:?})",
                current.state
            )));
        }
        let frame = self.codec.encode(&Packet::Command(command))?;

        let mut guard = self.writer.lock().await;
        let result = match guard.as_mut() {
            Some((generation, writer)) if *generation == current.generation => {
                write_frame(writer, &frame).await
            }
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed")),
        };

        match result {
            Ok(()) => {
                if self.current(current.generation) != Some(ConnectionState::Verified) {
                    guard.take();
                }
                Ok(current.generation)
            }
            Err(e) => {
                drop(guard);
                self.mark_lost(current.generation, &format!("write failed: {e}"));
                Err(SessionError::ConnectionLost(e.to_string()))
            }
        }
    }

    // ── Attempt machinery ─────────────────────────────────────────────────────

    fn begin_attempt(&self) -> Attempt {
        let mut attempt = Attempt::AlreadyVerified;
        self.state.send_if_modified(|p| match p.state {
            ConnectionState::Verified => false,
            ConnectionState::Aborting => {
                attempt = Attempt::Aborting;
                false
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                attempt = Attempt::Join(p.generation);
                false
            }
            ConnectionState::Disconnected | ConnectionState::Lost => {
                p.generation += 1;
                p.state = ConnectionState::Connecting;
                attempt = Attempt::Start(p.generation);
                true
            }
        });
        attempt
    }

    fn spawn_attempt(self: &Arc<Self>, generation: u64) {
        let span = info_span!(
            "attempt",
            id = %Uuid::new_v4(),
            generation,
            transport = %self.bootstrap.describe()
        );
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_attempt(generation).await }.instrument(span));

        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) {
        info!("opening transport");
        let transport = match self.bootstrap.open().await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, "transport open failed");
                let failure = AttemptFailure::Open {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                self.state.send_if_modified(|p| {
                    if p.generation == generation && p.state == ConnectionState::Connecting {
                        *lock(&self.failure) = Some((generation, failure));
                        p.state = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                });
                return;
            }
        };

        let (reader, writer) = tokio::io::split(transport);
        {
            let mut slot = self.writer.lock().await;
            if !self.transition(generation, ConnectionState::Connecting, ConnectionState::Connected) {
                debug!("attempt cancelled before the stream opened");
                return;
            }
            *slot = Some((generation, writer));
        }
        // `abort` may have run between the transition and the store, when its
        // own `try_lock` could not reach the slot.
        if self.current(generation).is_none() {
            debug!("attempt ended while the stream was being installed");
            self.release_writer(generation).await;
            return;
        }
        info!("transport open, waiting for handshake");

        let reason = self.receive_loop(generation, reader).await;
        self.mark_lost(generation, &reason);
        self.release_writer(generation).await;
    }

    /// Reads and dispatches until the link fails; returns the reason.
    async fn receive_loop(self: &Arc<Self>, generation: u64, mut reader: ReadHalf<BoxedTransport>) -> String {
        let mut decoder = StreamDecoder::new(Arc::clone(&self.codec), self.config.max_resync_failures);
        let mut buf = [0u8; 256];
        let handshake_deadline = Instant::now() + self.config.handshake_timeout();
        let frame_timeout = self.config.frame_timeout();
        // When the bytes left in the decoder started waiting as a partial frame.
        let mut partial_since: Option<Instant> = None;

        loop {
            let verified = match self.current(generation) {
                Some(state) => state == ConnectionState::Verified,
                None => return "connection superseded".to_string(),
            };

            let read = async {
                let read = reader.read(&mut buf);
                if verified {
                    match self.config.silence_timeout() {
                        Some(limit) => time::timeout(limit, read)
                            .await
                            .map_err(|_| format!("no inbound traffic for {limit:?}")),
                        None => Ok(read.await),
                    }
                } else {
                    time::timeout_at(handshake_deadline, read)
                        .await
                        .map_err(|_| "handshake not received in time".to_string())
                }
            };
            let stall_deadline = partial_since.zip(frame_timeout).map(|(since, limit)| since + limit);
            let stalled = async {
                match stall_deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            let inbound = tokio::select! {
                result = read => Some(result),
                () = stalled => None,
            };

            let mut progressed = false;
            match inbound {
                None => {
                    debug!(buffered = decoder.buffered_len(), "abandoning stalled partial frame");
                    if let Some(outcome) = decoder.abandon_partial() {
                        progressed = true;
                        if let Err(reason) = self.apply_outcome(generation, outcome) {
                            return reason;
                        }
                    }
                }
                Some(Err(reason)) => return reason,
                Some(Ok(Ok(0))) => return "stream closed by board".to_string(),
                Some(Ok(Ok(n))) => {
                    trace!(bytes = n, "received");
                    decoder.extend(&buf[..n]);
                }
                Some(Ok(Err(e))) => return format!("read failed: {e}"),
            }

            while let Some(outcome) = decoder.next_outcome() {
                progressed = true;
                if let Err(reason) = self.apply_outcome(generation, outcome) {
                    return reason;
                }
            }

            if decoder.buffered_len() == 0 {
                partial_since = None;
            } else if progressed || partial_since.is_none() {
                partial_since = Some(Instant::now());
            }
        }
    }

    fn apply_outcome(self: &Arc<Self>, generation: u64, outcome: DecodeOutcome) -> Result<(), String> {
        match outcome {
            DecodeOutcome::Packet(Packet::Event(event)) => self.handle_event(generation, event),
            DecodeOutcome::Packet(Packet::Command(command)) => {
                warn!(op = ?command.op_code(), "ignoring command frame sent by board");
                Ok(())
            }
            DecodeOutcome::Malformed(e) => {
                warn!(error = %e, "dropped malformed frame");
                Ok(())
            }
            DecodeOutcome::ResyncExhausted => Err("too many consecutive malformed frames".to_string()),
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: Event) -> Result<(), String> {
        match &event {
            Event::Handshake(info) => {
                if !info.is_compatible() {
                    return Err(format!(
                        "incompatible protocol version {} (host speaks {PROTOCOL_VERSION})",
                        info.protocol_version
                    ));
                }
                // Stored in the same step as the transition so that a
                // concurrent `abort` or `mark_lost` always clears it after.
                let verified = self.state.send_if_modified(|p| {
                    if p.generation == generation && p.state == ConnectionState::Connected {
                        *lock(&self.handshake) = Some(info.clone());
                        p.state = ConnectionState::Verified;
                        true
                    } else {
                        false
                    }
                });
                if verified {
                    info!(
                        hardware = %info.hardware_id,
                        bootloader = %info.bootloader_id,
                        firmware = %info.firmware_id,
                        "board verified"
                    );
                    self.spawn_keepalive(generation);
                }
            }
            Event::Pong(token) => trace!(token, "pong"),
            _ => {}
        }
        self.listeners.dispatch(&event);
        Ok(())
    }

    fn spawn_keepalive(self: &Arc<Self>, generation: u64) {
        let Some(interval) = self.config.keepalive_interval() else {
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                let mut ticker = time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if this.current(generation) != Some(ConnectionState::Verified) {
                        break;
                    }
                    let token = this.next_ping.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = this.queue_packet(Command::Ping(token)).await {
                        debug!(error = %e, "keepalive stopped");
                        break;
                    }
                    trace!(token, "ping sent");
                }
            }
            .in_current_span(),
        );
        lock(&self.tasks).push(handle);
    }

    async fn settle(&self, mut rx: watch::Receiver<Published>, generation: u64) -> Result<(), SessionError> {
        let delay = self.config.settle_delay();
        if delay.is_zero() {
            return Ok(());
        }
        let left = async {
            rx.wait_for(|p| p.generation != generation || p.state != ConnectionState::Verified)
                .await
                .map(|p| *p)
        };
        tokio::select! {
            _ = time::sleep(delay) => Ok(()),
            changed = left => match changed {
                Ok(seen) => self.attempt_outcome(seen, generation),
                Err(_) => Err(aborted()),
            },
        }
    }

    fn attempt_outcome(&self, seen: Published, generation: u64) -> Result<(), SessionError> {
        if seen.generation == generation && seen.state == ConnectionState::Aborting {
            return Err(aborted());
        }
        let failure = lock(&self.failure)
            .as_ref()
            .filter(|(g, _)| *g == generation)
            .map(|(_, f)| f.clone());
        match failure {
            Some(AttemptFailure::Open { kind, message }) => {
                Err(SessionError::TransportOpen(io::Error::new(kind, message)))
            }
            Some(AttemptFailure::Lost(reason)) => Err(SessionError::ConnectionLost(reason)),
            None => Err(aborted()),
        }
    }

    // ── State helpers ─────────────────────────────────────────────────────────

    /// State of `generation` if it is still the live attempt.
    fn current(&self, generation: u64) -> Option<ConnectionState> {
        let p = *self.state.borrow();
        (p.generation == generation && p.state.is_live()).then_some(p.state)
    }

    fn transition(&self, generation: u64, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|p| {
            if p.generation == generation && p.state == from {
                p.state = to;
                true
            } else {
                false
            }
        })
    }

    /// Moves a live `generation` to `Lost` and notifies listeners.  Returns
    /// `false` if the attempt had already ended.
    fn mark_lost(&self, generation: u64, reason: &str) -> bool {
        let lost = self.state.send_if_modified(|p| {
            if p.generation == generation && p.state.is_live() {
                *lock(&self.failure) = Some((generation, AttemptFailure::Lost(reason.to_string())));
                p.state = ConnectionState::Lost;
                true
            } else {
                false
            }
        });
        if lost {
            warn!(%reason, "connection lost");
            lock(&self.handshake).take();
            self.stop_tasks();
            self.drop_writer_now();
            self.listeners.notify_disconnect();
        }
        lost
    }

    fn stop_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    // A writer busy mid-write is cleared by `send_command` once it finishes.
    fn drop_writer_now(&self) {
        if let Ok(mut guard) = self.writer.try_lock() {
            guard.take();
        }
    }

    async fn release_writer(&self, generation: u64) {
        let mut guard = self.writer.lock().await;
        if matches!(guard.as_ref(), Some((g, _)) if *g == generation) {
            guard.take();
        }
    }
}

async fn write_frame(writer: &mut Writer, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
