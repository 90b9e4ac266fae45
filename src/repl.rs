//! REPL session state machine.
//!
//! Consumes the decoded text stream from the device, watches for the
//! interpreter prompt, drives transmission of queued commands one at a
//! time, and picks structured JSON replies out of the interleaved console
//! output.
//!
//! The session itself performs no I/O: `feed` returns the events (including
//! bytes to transmit) for the caller to act on. This keeps the parser
//! drivable from plain unit tests; the async loop in the controller owns
//! the actual reads and writes.

use serde_json::Value;

use crate::board::BoardProfile;
use crate::error::MalformedResponse;
use crate::queue::CommandQueue;

/// Connection-level state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    /// No interpreter contact yet.
    Closed,
    /// Interrupt sent, waiting for the first prompt.
    Opening,
    /// Prompt observed, no command in flight.
    Idle,
    /// A command has been written, awaiting the next prompt.
    Busy,
}

/// What the session wants done after consuming input.
#[derive(Debug)]
pub enum SessionEvent {
    /// Bytes to write to the channel.
    Transmit(String),
    /// A structured reply line, parsed.
    Response(Value),
    /// A marker line that was not valid JSON; the wire contract was
    /// violated and the caller must report it.
    BadResponse(MalformedResponse),
    /// An ordinary console output line.
    Output(String),
    /// A firmware traceback started; queue servicing is suspended.
    Fault(String),
    /// The interpreter regained control; carries the collected traceback.
    Recovered(String),
}

pub struct ReplSession {
    profile: BoardProfile,
    state: ReplState,
    /// Orthogonal to `state`: set while a traceback is being emitted.
    error: bool,
    error_text: String,
    /// Not-yet-parsed tail of the device output.
    buffer: String,
    queue: CommandQueue,
    /// Raw text of the command currently awaiting its prompt.
    in_flight: Option<String>,
    /// Precomputed `{"<tag>":` marker that distinguishes reply lines.
    marker: String,
}

impl ReplSession {
    pub fn new(profile: BoardProfile) -> Self {
        let marker = format!("{{\"{}\":", profile.response_tag);
        Self {
            profile,
            state: ReplState::Closed,
            error: false,
            error_text: String::new(),
            buffer: String::new(),
            queue: CommandQueue::new(),
            in_flight: None,
            marker,
        }
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Begin opening the interpreter: transmit the out-of-band interrupt so
    /// the firmware drops whatever it is running and shows its prompt.
    pub fn open(&mut self) -> SessionEvent {
        self.state = ReplState::Opening;
        SessionEvent::Transmit(self.profile.interrupt.to_string())
    }

    pub fn enqueue(&mut self, cmd: impl Into<String>) {
        self.queue.enqueue(cmd);
    }

    pub fn enqueue_all<I, S>(&mut self, cmds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queue.enqueue_all(cmds);
    }

    /// Discard all queued commands and any in-flight marker.
    pub fn clear(&mut self) {
        self.queue.reset();
        self.in_flight = None;
    }

    /// Mark the session closed (channel torn down).
    pub fn close(&mut self) {
        self.state = ReplState::Closed;
        self.clear();
    }

    /// If the interpreter is idle and clean, take the next queued command
    /// for transmission.
    pub fn pump(&mut self) -> Option<SessionEvent> {
        if self.state != ReplState::Idle || self.error {
            return None;
        }
        let cmd = self.queue.dequeue()?;
        let line = format!("{}{}", cmd, self.profile.line_ending);
        self.in_flight = Some(cmd);
        self.state = ReplState::Busy;
        Some(SessionEvent::Transmit(line))
    }

    /// Consume a decoded chunk of device output.
    ///
    /// Complete lines are scanned exactly once; a partial trailing line is
    /// retained for the next call. Returns the resulting events in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.buffer.push_str(chunk);

        while let Some(pos) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=pos).collect();
            let line = raw.trim_end_matches(['\n', '\r']);
            self.scan_line(line, &mut events);
        }

        // The prompt never carries a newline, so it can only be the
        // remaining tail.
        if self.buffer == self.profile.prompt {
            self.buffer.clear();
            self.on_prompt(&mut events);
        }

        events
    }

    /// Prompt observed: the interpreter is back in control.
    fn on_prompt(&mut self, events: &mut Vec<SessionEvent>) {
        self.state = ReplState::Idle;
        self.in_flight = None;
        if !self.queue.is_empty() && !self.error {
            if let Some(ev) = self.pump() {
                events.push(ev);
            }
        } else {
            // Nothing serviceable; drop stale requests rather than let them
            // fire against unknown interpreter state later.
            self.queue.reset();
        }
    }

    fn scan_line(&mut self, line: &str, events: &mut Vec<SessionEvent>) {
        if line.contains(&self.marker) {
            let cleaned = normalize_literals(line.trim());
            match serde_json::from_str::<Value>(&cleaned) {
                Ok(value) => events.push(SessionEvent::Response(value)),
                Err(source) => events.push(SessionEvent::BadResponse(MalformedResponse {
                    line: line.to_string(),
                    source,
                })),
            }
            return;
        }

        if !self.error && line.contains(self.profile.traceback_marker) {
            self.error = true;
            self.error_text.clear();
            events.push(SessionEvent::Fault(line.to_string()));
        }
        if self.error {
            self.error_text.push_str(line);
            self.error_text.push('\n');
        }
        if self.error && line.contains(self.profile.recovery_marker) {
            self.error = false;
            events.push(SessionEvent::Recovered(std::mem::take(&mut self.error_text)));
        }

        events.push(SessionEvent::Output(line.to_string()));
    }
}

/// Rewrite the device-side literal spellings (`True`, `False`, `None`) to
/// standard JSON before decoding.
///
/// Only bare tokens outside string literals are touched, so a reply value
/// like `"True story"` survives intact.
fn normalize_literals(line: &str) -> String {
    const SUBS: [(&str, &str); 3] = [("True", "true"), ("False", "false"), ("None", "null")];

    fn is_word(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < line.len() {
        let Some(ch) = line[i..].chars().next() else {
            break;
        };
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            i += ch.len_utf8();
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        let prev_is_word = out.chars().next_back().map(is_word).unwrap_or(false);
        if !prev_is_word {
            if let Some((from, to)) = SUBS.iter().find(|(from, _)| line[i..].starts_with(from)) {
                let end = i + from.len();
                let next_is_word = line[end..].chars().next().map(is_word).unwrap_or(false);
                if !next_is_word {
                    out.push_str(to);
                    i = end;
                    continue;
                }
            }
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ESP32;
    use serde_json::json;

    fn session() -> ReplSession {
        ReplSession::new(ESP32)
    }

    fn transmits(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Transmit(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn responses(events: &[SessionEvent]) -> Vec<Value> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Response(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_transmits_interrupt() {
        let mut s = session();
        let ev = s.open();
        assert!(matches!(ev, SessionEvent::Transmit(ref b) if b == "\x03"));
        assert_eq!(s.state(), ReplState::Opening);
    }

    #[test]
    fn prompt_dispatches_queue_in_fifo_order_one_at_a_time() {
        let mut s = session();
        s.open();
        s.enqueue_all(["first", "second"]);

        let events = s.feed(">>> ");
        assert_eq!(transmits(&events), vec!["first\r\n"]);
        assert_eq!(s.state(), ReplState::Busy);

        // Echo and output arrive, then the next prompt: exactly one more
        // command goes out.
        let events = s.feed("first\r\nok\r\n>>> ");
        assert_eq!(transmits(&events), vec!["second\r\n"]);

        let events = s.feed("second\r\n>>> ");
        assert!(transmits(&events).is_empty());
        assert_eq!(s.state(), ReplState::Idle);
    }

    #[test]
    fn prompt_with_empty_queue_clears_defensively() {
        let mut s = session();
        s.open();
        s.feed(">>> ");
        assert_eq!(s.state(), ReplState::Idle);
        assert_eq!(s.queue_len(), 0);
    }

    #[test]
    fn pump_transmits_immediately_when_idle() {
        let mut s = session();
        s.open();
        s.feed(">>> ");
        s.enqueue("print(1)");
        let ev = s.pump().expect("idle session should transmit");
        assert!(matches!(ev, SessionEvent::Transmit(ref b) if b == "print(1)\r\n"));
        assert_eq!(s.in_flight(), Some("print(1)"));
        // Busy now; a second pump must not pipeline.
        s.enqueue("print(2)");
        assert!(s.pump().is_none());
    }

    #[test]
    fn response_line_is_parsed() {
        let mut s = session();
        let events = s.feed("{\"cmd\":\"X\",\"status\":1,\"value\":42}\r\n");
        assert_eq!(
            responses(&events),
            vec![json!({"cmd": "X", "status": 1, "value": 42})]
        );
    }

    #[test]
    fn response_split_across_chunks_parses_once_assembled() {
        let mut s = session();
        let events = s.feed("{\"cmd\":\"X\",");
        assert!(responses(&events).is_empty());
        let events = s.feed("\"value\":1}\n");
        assert_eq!(responses(&events), vec![json!({"cmd": "X", "value": 1})]);
    }

    #[test]
    fn device_literals_are_normalized() {
        let mut s = session();
        let events = s.feed("{\"cmd\":\"X\",\"status\":1,\"value\":True,\"extra\":None}\n");
        let got = responses(&events);
        assert_eq!(got[0]["value"], json!(true));
        assert_eq!(got[0]["extra"], json!(null));
    }

    #[test]
    fn malformed_marker_line_is_reported_not_dropped() {
        let mut s = session();
        let events = s.feed("{\"cmd\":\"X\",\"value\":}\n");
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::BadResponse(_))));
        assert!(responses(&events).is_empty());
    }

    #[test]
    fn traceback_suspends_until_recovery_marker() {
        let mut s = session();
        s.open();
        s.feed(">>> ");

        s.feed("Traceback (most recent call last):\r\n");
        assert!(s.has_error());

        // Commands enqueued while faulted are not transmitted; the prompt
        // clears them defensively.
        s.enqueue("lost");
        let events = s.feed("  File \"<stdin>\", line 1\r\n>>> ");
        assert!(transmits(&events).is_empty());
        assert_eq!(s.queue_len(), 0);

        let events = s.feed("KeyboardInterrupt\r\n");
        assert!(!s.has_error());
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Recovered(t) if t.contains("Traceback"))));

        // The next enqueued command goes out on the next prompt match.
        s.enqueue("back");
        let events = s.feed(">>> ");
        assert_eq!(transmits(&events), vec!["back\r\n"]);
    }

    #[test]
    fn partial_line_is_parsed_exactly_once() {
        let mut s = session();
        let events = s.feed("par");
        assert!(events.is_empty());
        let events = s.feed("tial\r\n");
        let outputs: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Output(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["partial"]);
    }

    #[test]
    fn normalize_leaves_quoted_strings_alone() {
        let line = "{\"cmd\":\"X\",\"value\":\"True story, None of it\"}";
        assert_eq!(normalize_literals(line), line);
        assert_eq!(
            normalize_literals("{\"a\":True,\"b\":False,\"c\":None}"),
            "{\"a\":true,\"b\":false,\"c\":null}"
        );
        // Identifier-adjacent tokens are not touched.
        assert_eq!(normalize_literals("NotTrue"), "NotTrue");
        assert_eq!(normalize_literals("Truely"), "Truely");
    }
}
