//! Byte-stream reader.
//!
//! Pulls raw bytes from the serial channel and exposes them as a lazy
//! sequence of UTF-8 text chunks. Multi-byte sequences split across reads
//! are held back until complete, so callers always see valid text.
//!
//! Transient line faults (framing, parity, buffer overrun) are absorbed
//! here: the read loop restarts and keeps yielding. A break condition or a
//! vanished device ends the sequence with an error the controller must act
//! on.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::FrameError;

/// Delay between successive reads, to avoid hammering the transport.
const READ_PACING: Duration = Duration::from_millis(40);

/// How an I/O failure on the channel should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Framing/parity/overrun: restart the read loop, drop nothing else.
    Recoverable,
    /// Break condition: report, do not retry.
    Break,
    /// Device unplugged or port revoked: connection is gone.
    DeviceLost,
    /// Anything else: treated as fatal.
    Fatal,
}

fn classify(err: &std::io::Error) -> Fault {
    use std::io::ErrorKind;

    let msg = err.to_string().to_ascii_lowercase();
    if msg.contains("parity") || msg.contains("framing") || msg.contains("overrun") {
        return Fault::Recoverable;
    }
    if msg.contains("break") {
        return Fault::Break;
    }
    if msg.contains("device") || msg.contains("lost") {
        return Fault::DeviceLost;
    }
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            Fault::DeviceLost
        }
        _ => Fault::Fatal,
    }
}

/// Restartable reader over an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    /// Undecoded tail of a multi-byte UTF-8 sequence.
    pending: Vec<u8>,
    pace: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            pace: READ_PACING,
        }
    }

    /// Override the inter-read pacing delay. Tests run with zero.
    pub fn with_pacing(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Pull the next decoded text chunk.
    ///
    /// Returns `Ok(None)` on end-of-stream. Recoverable line faults are
    /// logged and retried internally; only terminal faults surface.
    pub async fn next_chunk(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let mut buf = [0u8; 256];
            let n = match self.inner.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => match classify(&err) {
                    Fault::Recoverable => {
                        tracing::warn!("recoverable serial fault, restarting read: {err}");
                        self.pending.clear();
                        continue;
                    }
                    Fault::Break => return Err(FrameError::Break),
                    Fault::DeviceLost => return Err(FrameError::DeviceLost),
                    Fault::Fatal => return Err(FrameError::Io(err)),
                },
            };

            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&buf[..n]);
            let text = self.drain_decoded();

            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
            if !text.is_empty() {
                return Ok(Some(text));
            }
            // Everything read so far is an incomplete sequence tail.
        }
    }

    /// Decode as much of the pending buffer as is valid UTF-8, retaining an
    /// incomplete trailing sequence for the next read.
    fn drain_decoded(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete multi-byte sequence at the end: keep it.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        // Invalid bytes mid-stream (line noise): replace and
                        // keep going.
                        Some(len) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Scripted byte source: each entry is one `read` outcome.
    struct ScriptedPort {
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl AsyncRead for ScriptedPort {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf.put_slice(&bytes);
                    Poll::Ready(Ok(()))
                }
                Some(Err(err)) => Poll::Ready(Err(err)),
                // Script exhausted: behave like end-of-stream.
                None => Poll::Ready(Ok(())),
            }
        }
    }

    fn reader(script: Vec<io::Result<Vec<u8>>>) -> FrameReader<ScriptedPort> {
        FrameReader::new(ScriptedPort::new(script)).with_pacing(Duration::ZERO)
    }

    #[tokio::test]
    async fn yields_decoded_chunks_then_eof() {
        let mut r = reader(vec![Ok(b"hello ".to_vec()), Ok(b"world\n".to_vec())]);
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("hello "));
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("world\n"));
        assert!(r.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_after_parity_error() {
        let mut r = reader(vec![
            Ok(b"before".to_vec()),
            Err(io::Error::other("A parity error has been detected.")),
            Ok(b"after".to_vec()),
        ]);
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("before"));
        // The fault is absorbed; the next chunk comes through untouched.
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn device_lost_is_fatal() {
        let mut r = reader(vec![Err(io::Error::other("The device has been lost."))]);
        assert!(matches!(
            r.next_chunk().await,
            Err(FrameError::DeviceLost)
        ));
    }

    #[tokio::test]
    async fn break_condition_is_reported() {
        let mut r = reader(vec![Err(io::Error::other(
            "A break condition has been detected.",
        ))]);
        assert!(matches!(r.next_chunk().await, Err(FrameError::Break)));
    }

    #[tokio::test]
    async fn multibyte_char_split_across_reads() {
        // U+00E9 is 0xC3 0xA9; split it between two reads.
        let mut r = reader(vec![Ok(vec![b'a', 0xC3]), Ok(vec![0xA9, b'b'])]);
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("a"));
        assert_eq!(r.next_chunk().await.unwrap().as_deref(), Some("\u{e9}b"));
    }

    #[test]
    fn classify_matches_known_faults() {
        let parity = io::Error::other("A framing error has been detected.");
        assert_eq!(classify(&parity), Fault::Recoverable);
        let overrun = io::Error::other("A buffer overrun has been detected.");
        assert_eq!(classify(&overrun), Fault::Recoverable);
        let gone = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(classify(&gone), Fault::DeviceLost);
        let other = io::Error::other("something else entirely");
        assert_eq!(classify(&other), Fault::Fatal);
    }
}
