//! Progress event streams.
//!
//! Long-running operations (build, clean, publish) are plain iterators of
//! `Result<T, E>`. [`EventStream`] drives such a producer one item at a time
//! and turns it into [`ProgressEvent`]s, each of which encodes to one
//! self-contained frame:
//!
//! ```text
//! data: {"msg": "line1"}
//!
//! data: {"msg": "Error: wups"}
//!
//! data: null
//!
//! ```
//!
//! The stream always ends with exactly one terminal frame. A producer error
//! becomes a final `Error: ` message followed by the terminal frame, so a
//! consumer never sees a stream that just stops. The producer is dropped the
//! moment the stream leaves the producing state, releasing whatever it holds
//! (the builder lock, open directory walkers); dropping the stream early does
//! the same.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::fmt;
use std::io;
use std::iter::FusedIterator;
use thiserror::Error;

const FRAME_PREFIX: &str = "data: ";
const FRAME_SUFFIX: &str = "\n\n";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame must look like 'data: <json>\\n\\n'")]
    Malformed,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single progress message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub msg: String,
}

impl Progress {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// One event of a progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Message(serde_json::Value),
    Terminal,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// The `msg` field of a message payload, if it has one.
    pub fn msg(&self) -> Option<&str> {
        match self {
            Self::Message(value) => value.get("msg").and_then(|m| m.as_str()),
            Self::Terminal => None,
        }
    }

    /// Encode as a `data: <json>\n\n` frame.
    pub fn to_frame(&self) -> String {
        let json = match self {
            Self::Message(value) => encode_json(value),
            Self::Terminal => "null".to_string(),
        };
        format!("{FRAME_PREFIX}{json}{FRAME_SUFFIX}")
    }

    /// Decode a single frame produced by [`to_frame`](Self::to_frame).
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let json = frame
            .strip_prefix(FRAME_PREFIX)
            .and_then(|rest| rest.strip_suffix(FRAME_SUFFIX))
            .ok_or(FrameError::Malformed)?;
        if json.contains(FRAME_SUFFIX) {
            return Err(FrameError::Malformed);
        }
        match serde_json::from_str(json)? {
            serde_json::Value::Null => Ok(Self::Terminal),
            value => Ok(Self::Message(value)),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_frame())
    }
}

/// JSON with `", "` and `": "` separators, the layout event consumers
/// expect. Control characters are escaped, so a frame never contains a
/// blank line.
fn encode_json(value: &serde_json::Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn error_event(message: impl fmt::Display) -> ProgressEvent {
    ProgressEvent::Message(serde_json::json!({ "msg": format!("Error: {message}") }))
}

enum State<I> {
    Producing(I),
    Erroring(String),
    Closing,
    Terminated,
}

/// Drives a producer and frames its output.
pub struct EventStream<I> {
    state: State<I>,
}

impl<I> EventStream<I> {
    pub fn new(producer: I) -> Self {
        Self {
            state: State::Producing(producer),
        }
    }

    /// Whether the terminal event has been emitted.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Terminated)
    }
}

impl<I, T, E> EventStream<I>
where
    I: Iterator<Item = Result<T, E>>,
    T: Serialize,
    E: fmt::Display,
{
    /// Encoded frames, one per event.
    pub fn frames(self) -> impl Iterator<Item = String> {
        self.map(|event| event.to_frame())
    }
}

impl<I, T, E> Iterator for EventStream<I>
where
    I: Iterator<Item = Result<T, E>>,
    T: Serialize,
    E: fmt::Display,
{
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        // Taking the state drops the producer on every path that leaves
        // the producing state.
        match std::mem::replace(&mut self.state, State::Terminated) {
            State::Producing(mut producer) => match producer.next() {
                Some(Ok(message)) => match serde_json::to_value(&message) {
                    Ok(value) => {
                        self.state = State::Producing(producer);
                        Some(ProgressEvent::Message(value))
                    }
                    Err(e) => {
                        self.state = State::Closing;
                        Some(error_event(e))
                    }
                },
                Some(Err(e)) => {
                    self.state = State::Erroring(e.to_string());
                    drop(producer);
                    self.next()
                }
                None => Some(ProgressEvent::Terminal),
            },
            State::Erroring(message) => {
                tracing::warn!(error = %message, "progress stream failed");
                self.state = State::Closing;
                Some(error_event(message))
            }
            State::Closing => Some(ProgressEvent::Terminal),
            State::Terminated => None,
        }
    }
}

impl<I, T, E> FusedIterator for EventStream<I>
where
    I: Iterator<Item = Result<T, E>>,
    T: Serialize,
    E: fmt::Display,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn ok<T>(items: Vec<T>) -> impl Iterator<Item = Result<T, String>> {
        items.into_iter().map(Ok)
    }

    #[test]
    fn two_messages_then_terminal() {
        let events: Vec<ProgressEvent> = EventStream::new(ok(vec!["string".to_string(), "5".to_string()])).collect();
        assert_eq!(events.len(), 3);
        assert!(events[2].is_terminal());
        for event in &events {
            let frame = event.to_frame();
            assert_eq!(&ProgressEvent::decode(&frame).unwrap(), event);
        }
    }

    #[test]
    fn mixed_payload_types_are_framed() {
        let producer = vec![Ok(serde_json::json!("string")), Ok(serde_json::json!(5))];
        let frames: Vec<String> = EventStream::new(producer.into_iter().map(|r: Result<_, String>| r))
            .frames()
            .collect();
        assert_eq!(frames, vec!["data: \"string\"\n\n", "data: 5\n\n", "data: null\n\n"]);
    }

    #[test]
    fn error_becomes_message_then_terminal() {
        let producer = vec![Ok(Progress::new("line1")), Err("wups".to_string()), Ok(Progress::new("never"))];
        let frames: Vec<String> = EventStream::new(producer.into_iter()).frames().collect();
        assert_eq!(
            frames,
            vec![
                "data: {\"msg\": \"line1\"}\n\n",
                "data: {\"msg\": \"Error: wups\"}\n\n",
                "data: null\n\n",
            ]
        );
    }

    #[test]
    fn empty_producer_still_terminates() {
        let mut stream = EventStream::new(ok(Vec::<Progress>::new()));
        assert_eq!(stream.next(), Some(ProgressEvent::Terminal));
        assert!(stream.is_terminated());
        assert_eq!(stream.next(), None);
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn producer_is_resumed_only_on_demand() {
        let pulled = Rc::new(Cell::new(0));
        let counter = Rc::clone(&pulled);
        let producer = (0..3).map(move |i| {
            counter.set(counter.get() + 1);
            Ok::<_, String>(Progress::new(format!("step {i}")))
        });
        let mut stream = EventStream::new(producer);
        assert_eq!(pulled.get(), 0);
        assert_eq!(stream.next().unwrap().msg(), Some("step 0"));
        assert_eq!(pulled.get(), 1);
        assert_eq!(stream.next().unwrap().msg(), Some("step 1"));
        assert_eq!(pulled.get(), 2);
    }

    struct DropFlag(Rc<Cell<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn producer_released_on_error_before_terminal() {
        let dropped = Rc::new(Cell::new(false));
        let guard = DropFlag(Rc::clone(&dropped));
        let producer = std::iter::once(Err::<Progress, _>("boom".to_string())).map(move |r| {
            let _held = &guard;
            r
        });
        let mut stream = EventStream::new(producer);
        assert_eq!(stream.next().unwrap().msg(), Some("Error: boom"));
        assert!(dropped.get());
        assert!(stream.next().unwrap().is_terminal());
    }

    #[test]
    fn dropping_stream_releases_producer() {
        let dropped = Rc::new(Cell::new(false));
        let guard = DropFlag(Rc::clone(&dropped));
        let producer = (0..10).map(move |i| {
            let _held = &guard;
            Ok::<_, String>(Progress::new(i.to_string()))
        });
        let mut stream = EventStream::new(producer);
        stream.next();
        assert!(!dropped.get());
        drop(stream);
        assert!(dropped.get());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(ProgressEvent::decode("nope").is_err());
        assert!(ProgressEvent::decode("data: {\n\n").is_err());
        assert!(ProgressEvent::decode("data: 1\n\ndata: 2\n\n").is_err());
    }
}
