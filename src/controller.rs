//! Per-board device controller.
//!
//! Binds one serial channel to one REPL session and exposes the public
//! surface the CLI commands use: `connect`, `send`, `get`,
//! `wait_board_response`, `reset`, `is_connected`.
//!
//! Responses carry no correlation identifier on the wire; they are matched
//! to requests purely by queue order, and only one command is ever in
//! flight. Callers must therefore sequence `get`/`wait_board_response`
//! pairs one at a time — overlapping `get` calls can misattribute replies.
//! That limitation is inherited from the wire protocol; the optional busy
//! guard in [`ControllerOptions`] turns it into a hard error instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::board::{self, BoardProfile};
use crate::channel;
use crate::error::{DeviceError, FrameError};
use crate::reader::FrameReader;
use crate::repl::{ReplSession, ReplState, SessionEvent};

/// A structured reply from the board.
#[derive(Debug, Clone, Deserialize)]
pub struct BoardReply {
    /// Echo of the command identifier the firmware tagged the reply with.
    pub cmd: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub value: Value,
}

/// Why a parked `wait_board_response` caller was woken without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFailure {
    Reset,
    Lost,
}

/// The single outstanding request, observed through a watch channel.
#[derive(Debug, Clone, Default)]
struct ResponseSlot {
    waiting: bool,
    reply: Option<BoardReply>,
    failed: Option<WaitFailure>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    /// Reject `get` while a previous response is still pending, instead of
    /// inheriting the protocol's silent misattribution race.
    pub reject_overlapping_get: bool,
}

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Live connection state; exists only between `connect` and `reset`.
struct Link {
    session: Arc<Mutex<ReplSession>>,
    writer: SharedWriter,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct DeviceController {
    profile: BoardProfile,
    options: ControllerOptions,
    link: Option<Link>,
    response_tx: watch::Sender<ResponseSlot>,
    response_rx: watch::Receiver<ResponseSlot>,
    output_tx: broadcast::Sender<String>,
}

impl DeviceController {
    pub fn new(profile: BoardProfile) -> Self {
        Self::with_options(profile, ControllerOptions::default())
    }

    pub fn with_options(profile: BoardProfile, options: ControllerOptions) -> Self {
        let (response_tx, response_rx) = watch::channel(ResponseSlot::default());
        let (output_tx, _) = broadcast::channel(64);
        Self {
            profile,
            options,
            link: None,
            response_tx,
            response_rx,
            output_tx,
        }
    }

    pub fn profile(&self) -> &BoardProfile {
        &self.profile
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .map(|l| l.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Select and open a serial port for this board, start the read loop
    /// and open the interpreter prompt.
    ///
    /// Failure leaves the controller closed; callers may retry.
    pub async fn connect(&mut self, port_override: Option<&str>) -> Result<(), DeviceError> {
        if self.is_connected() {
            return Ok(());
        }

        let port_name = match port_override {
            Some(p) => p.to_string(),
            None => board::detect_port(&self.profile)?.ok_or(DeviceError::NoDevice {
                board: self.profile.name,
            })?,
        };
        channel::log_port_info(&port_name);

        let stream = channel::open_serial(&port_name, self.profile.baud)
            .await
            .map_err(|source| DeviceError::OpenFailed {
                port: port_name.clone(),
                source,
            })?;

        self.attach(stream).await;
        Ok(())
    }

    /// Bind an already-open duplex byte channel.
    ///
    /// `connect` uses this with the real serial stream; it also lets a
    /// caller bring their own transport (a TCP serial bridge, an in-memory
    /// pipe in tests).
    pub async fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let session = Arc::new(Mutex::new(ReplSession::new(self.profile)));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(write_half)));
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(drive(
            FrameReader::new(read_half),
            Arc::clone(&session),
            Arc::clone(&writer),
            Arc::clone(&connected),
            self.response_tx.clone(),
            self.output_tx.clone(),
        ));

        // Force the interpreter to its prompt.
        let open_ev = session.lock().await.open();
        write_event(&writer, open_ev).await;

        self.link = Some(Link {
            session,
            writer,
            connected,
            task,
        });
    }

    /// Fire-and-forget: queue a command for transmission.
    ///
    /// Returns once the command is queued, not once it has executed; use
    /// `get` + `wait_board_response` when the result matters.
    pub async fn send(&self, command: &str) -> Result<(), DeviceError> {
        let link = self.live_link()?;
        let mut session = link.session.lock().await;
        session.enqueue(command);
        let ev = session.pump();
        drop(session);
        if let Some(ev) = ev {
            write_event(&link.writer, ev).await;
        }
        Ok(())
    }

    /// Queue a list of commands and mark a response as pending. The caller
    /// must follow up with `wait_board_response`.
    pub async fn get<I, S>(&self, commands: I) -> Result<(), DeviceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let link = self.live_link()?;
        if self.options.reject_overlapping_get && self.response_rx.borrow().waiting {
            return Err(DeviceError::Busy);
        }
        let mut session = link.session.lock().await;
        session.enqueue_all(commands);
        self.response_tx.send_modify(|slot| {
            slot.waiting = true;
            slot.failed = None;
        });
        let ev = session.pump();
        drop(session);
        if let Some(ev) = ev {
            write_event(&link.writer, ev).await;
        }
        Ok(())
    }

    /// Suspend until the pending response arrives, then return it.
    ///
    /// Event-driven: resumes directly off the response-parsed event, no
    /// polling. A `reset` or lost connection while waiting rejects the
    /// caller instead of leaving it parked.
    pub async fn wait_board_response(&self) -> Result<BoardReply, DeviceError> {
        let mut rx = self.response_rx.clone();
        let slot = rx
            .wait_for(|slot| !slot.waiting)
            .await
            .map_err(|_| DeviceError::ConnectionLost)?;
        if let Some(failure) = slot.failed {
            return Err(match failure {
                WaitFailure::Reset => DeviceError::ResetWhileWaiting,
                WaitFailure::Lost => DeviceError::ConnectionLost,
            });
        }
        slot.reply.clone().ok_or(DeviceError::NoResponse)
    }

    /// Suspend until the prompt is showing and the queue is drained.
    ///
    /// Cooperative short-delay polling; used by fire-and-forget callers
    /// that must not exit before their commands have actually gone out.
    pub async fn wait_idle(&self) -> Result<(), DeviceError> {
        loop {
            {
                let link = self.live_link()?;
                let session = link.session.lock().await;
                if session.state() == ReplState::Idle && session.queue_len() == 0 {
                    return Ok(());
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Observe the device's console output (non-response lines).
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.output_tx.subscribe()
    }

    /// Tear the connection down unconditionally. Safe from any state and
    /// idempotent; pending commands are discarded, and a caller parked in
    /// `wait_board_response` is rejected.
    pub async fn reset(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
            link.connected.store(false, Ordering::SeqCst);
            link.session.lock().await.close();
            // Dropping the halves closes the port.
        }
        self.response_tx.send_modify(|slot| {
            if slot.waiting {
                slot.waiting = false;
                slot.failed = Some(WaitFailure::Reset);
            }
        });
    }

    fn live_link(&self) -> Result<&Link, DeviceError> {
        self.link
            .as_ref()
            .filter(|l| l.connected.load(Ordering::SeqCst))
            .ok_or(DeviceError::NotConnected)
    }
}

/// Write one session event's bytes to the channel. Write failures are
/// logged; the read side of the driver observes the actual loss.
async fn write_event(writer: &SharedWriter, ev: SessionEvent) {
    if let SessionEvent::Transmit(bytes) = ev {
        let mut w = writer.lock().await;
        if let Err(err) = w.write_all(bytes.as_bytes()).await {
            tracing::error!("serial write failed: {err}");
            return;
        }
        if let Err(err) = w.flush().await {
            tracing::error!("serial flush failed: {err}");
        }
    }
}

/// Read loop: feeds decoded chunks to the session and acts on its events.
async fn drive(
    mut reader: FrameReader<impl AsyncRead + Unpin>,
    session: Arc<Mutex<ReplSession>>,
    writer: SharedWriter,
    connected: Arc<AtomicBool>,
    response_tx: watch::Sender<ResponseSlot>,
    output_tx: broadcast::Sender<String>,
) {
    loop {
        match reader.next_chunk().await {
            Ok(Some(chunk)) => {
                let mut guard = session.lock().await;
                let events = guard.feed(&chunk);
                let pending = guard.in_flight().map(str::to_owned);
                drop(guard);
                for ev in events {
                    handle_event(ev, pending.as_deref(), &writer, &response_tx, &output_tx).await;
                }
            }
            Ok(None) => {
                tracing::info!("serial stream closed");
                break;
            }
            Err(FrameError::Break) => {
                tracing::error!("break condition on serial line; reconnect required");
                break;
            }
            Err(err) => {
                tracing::error!("serial connection lost: {err}");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    session.lock().await.close();
    // Reject anyone still parked on a response.
    response_tx.send_modify(|slot| {
        if slot.waiting {
            slot.waiting = false;
            slot.failed = Some(WaitFailure::Lost);
        }
    });
}

async fn handle_event(
    ev: SessionEvent,
    pending: Option<&str>,
    writer: &SharedWriter,
    response_tx: &watch::Sender<ResponseSlot>,
    output_tx: &broadcast::Sender<String>,
) {
    match ev {
        SessionEvent::Transmit(_) => write_event(writer, ev).await,
        SessionEvent::Response(value) => match serde_json::from_value::<BoardReply>(value.clone())
        {
            Ok(reply) => {
                tracing::debug!(
                    "board reply {} status={} value={}",
                    reply.cmd,
                    reply.status,
                    reply.value
                );
                response_tx.send_modify(|slot| {
                    slot.reply = Some(reply);
                    slot.waiting = false;
                });
            }
            Err(err) => {
                tracing::error!("reply line does not match wire contract: {err}; raw: {value}");
            }
        },
        SessionEvent::BadResponse(err) => match pending {
            Some(cmd) => tracing::error!("protocol violation after {cmd:?}: {err}"),
            None => tracing::error!("protocol violation: {err}"),
        },
        SessionEvent::Output(line) => {
            tracing::debug!(target: "device", "{line}");
            let _ = output_tx.send(line);
        }
        SessionEvent::Fault(line) => {
            tracing::warn!("firmware traceback begins: {line}");
        }
        SessionEvent::Recovered(trace) => {
            tracing::warn!("interpreter recovered from:\n{trace}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ESP32;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn expect_read(server: &mut DuplexStream, expect: &str) {
        let mut buf = vec![0u8; expect.len()];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(String::from_utf8_lossy(&buf), expect);
    }

    async fn attached() -> (DeviceController, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut ctl = DeviceController::new(ESP32);
        ctl.attach(client).await;
        // Opening the REPL writes the interrupt first.
        expect_read(&mut server, "\x03").await;
        (ctl, server)
    }

    #[tokio::test(start_paused = true)]
    async fn get_round_trip_resolves_value() {
        let (ctl, mut server) = attached().await;
        server.write_all(b">>> ").await.expect("write");

        ctl.get(["print(1)"]).await.expect("get");
        expect_read(&mut server, "print(1)\r\n").await;

        server
            .write_all(b"print(1)\r\n{\"cmd\":\"X\",\"status\":1,\"value\":42}\r\n>>> ")
            .await
            .expect("write");

        let reply = ctl.wait_board_response().await.expect("response");
        assert_eq!(reply.cmd, "X");
        assert_eq!(reply.status, 1);
        assert_eq!(reply.value, json!(42));
        assert!(ctl.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reach_device_in_fifo_order() {
        let (ctl, mut server) = attached().await;
        server.write_all(b">>> ").await.expect("write");

        ctl.send("a()").await.expect("send");
        ctl.send("b()").await.expect("send");
        ctl.send("c()").await.expect("send");

        expect_read(&mut server, "a()\r\n").await;
        server.write_all(b"a()\r\n>>> ").await.expect("write");
        expect_read(&mut server, "b()\r\n").await;
        server.write_all(b"b()\r\n>>> ").await.expect("write");
        expect_read(&mut server, "c()\r\n").await;
        server.write_all(b"c()\r\n>>> ").await.expect("write");

        ctl.wait_idle().await.expect("idle");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_twice_is_idempotent() {
        let (mut ctl, _server) = attached().await;
        ctl.reset().await;
        ctl.reset().await;
        assert!(!ctl.is_connected());
        assert!(ctl.send("x").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rejects_parked_waiter() {
        let (mut ctl, mut server) = attached().await;
        server.write_all(b">>> ").await.expect("write");

        ctl.get(["never_answered()"]).await.expect("get");
        expect_read(&mut server, "never_answered()\r\n").await;
        ctl.reset().await;

        assert!(matches!(
            ctl.wait_board_response().await,
            Err(DeviceError::ResetWhileWaiting)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_guard_rejects_overlapping_get() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut ctl = DeviceController::with_options(
            ESP32,
            ControllerOptions {
                reject_overlapping_get: true,
            },
        );
        ctl.attach(client).await;
        expect_read(&mut server, "\x03").await;
        server.write_all(b">>> ").await.expect("write");

        ctl.get(["first()"]).await.expect("get");
        assert!(matches!(
            ctl.get(["second()"]).await,
            Err(DeviceError::Busy)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn device_output_is_broadcast() {
        let (ctl, mut server) = attached().await;
        let mut output = ctl.subscribe_output();
        server
            .write_all(b"hello from the board\r\n>>> ")
            .await
            .expect("write");
        let line = output.recv().await.expect("output line");
        assert_eq!(line, "hello from the board");
    }

    #[tokio::test]
    async fn connect_without_device_is_nonfatal() {
        // STM32's Nucleo filter will not match anything on a test machine.
        let mut ctl = DeviceController::new(crate::board::STM32);
        let result = ctl.connect(None).await;
        assert!(result.is_err());
        assert!(!ctl.is_connected());
        // Retry is allowed and still clean.
        let result = ctl.connect(None).await;
        assert!(result.is_err());
        assert!(!ctl.is_connected());
    }
}
