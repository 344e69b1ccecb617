//! Decoding of streamed chat-completion responses.
//!
//! The response body is a sequence of newline-delimited `data: <json>`
//! lines closed by a `data: [DONE]` sentinel. Network chunks can split a
//! line (or a UTF-8 sequence) anywhere, so the decoder holds back the
//! trailing partial line until the next chunk arrives.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::groq::types::StreamChunk;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Content,
    Reasoning,
}

/// An incremental piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub channel: Channel,
    pub text: String,
}

impl Fragment {
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
        }
    }
}

/// Splits raw bytes into complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    // Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and get back every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Whatever is left once the transport is done.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Ignored,
    Done,
    Fragments(Vec<Fragment>),
}

/// Interpret one line of the event stream.
///
/// Malformed payloads are logged and skipped rather than failing the stream.
pub fn parse_line(line: &str) -> LineEvent {
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.is_empty() {
            trace!("ignoring non-data line: {}", line);
        }
        return LineEvent::Ignored;
    };
    let payload = payload.trim_start();

    if payload == DONE_SENTINEL {
        return LineEvent::Done;
    }

    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("skipping malformed stream event: {}, data: {}", e, payload);
            return LineEvent::Ignored;
        }
    };

    if let Some(error) = chunk.error {
        warn!("stream event carried an API error: {}", error);
        return LineEvent::Ignored;
    }

    let Some(delta) = chunk.choices.into_iter().next().map(|c| c.delta) else {
        return LineEvent::Ignored;
    };

    let mut fragments = Vec::with_capacity(2);
    if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
        fragments.push(Fragment::new(Channel::Content, text));
    }
    if let Some(text) = delta.reasoning.filter(|t| !t.is_empty()) {
        fragments.push(Fragment::new(Channel::Reasoning, text));
    }

    if fragments.is_empty() {
        LineEvent::Ignored
    } else {
        LineEvent::Fragments(fragments)
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    lines: LineDecoder,
    pending: VecDeque<Fragment>,
    saw_done: bool,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, line: &str) {
        match parse_line(line) {
            LineEvent::Fragments(fragments) => self.pending.extend(fragments),
            LineEvent::Done => self.saw_done = true,
            LineEvent::Ignored => {}
        }
    }
}

/// Decode a byte stream into content/reasoning fragments.
///
/// The result is lazy, finite, and not restartable. It ends when the
/// transport ends; a transport error is yielded once and ends it early.
pub fn decode_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<Fragment, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        inner: Box::pin(bytes),
        lines: LineDecoder::new(),
        pending: VecDeque::new(),
        saw_done: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.feed(chunk.as_ref()) {
                        state.absorb(&line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    if let Some(rest) = state.lines.finish() {
                        state.absorb(&rest);
                    }
                    debug!("stream transport closed (sentinel seen: {})", state.saw_done);
                    state.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_holds_back_partial_lines() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.feed(b":1}\r\ndata: x"), vec!["data: {\"a\":1}"]);
        assert_eq!(decoder.finish().as_deref(), Some("data: x"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn long_line_in_tiny_chunks_is_scanned_once() {
        let payload = format!("data: {}", "x".repeat(20_000));
        let mut decoder = LineDecoder::new();
        for byte in payload.as_bytes() {
            assert!(decoder.feed(std::slice::from_ref(byte)).is_empty());
            assert_eq!(decoder.scanned, decoder.buf.len());
        }
        assert_eq!(decoder.feed(b"\ndata: [DONE]\n"), vec![payload, "data: [DONE]".to_string()]);
        assert!(decoder.buf.is_empty());
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn decoder_survives_split_utf8() {
        let text = "data: héllo\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(&text[..split]).is_empty());
        assert_eq!(decoder.feed(&text[split..]), vec!["data: héllo"]);
    }

    #[test]
    fn parses_content_and_reasoning() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi","reasoning":"greet"}}]}"#;
        assert_eq!(
            parse_line(line),
            LineEvent::Fragments(vec![
                Fragment::new(Channel::Content, "Hi"),
                Fragment::new(Channel::Reasoning, "greet"),
            ])
        );
    }

    #[test]
    fn sentinel_and_noise() {
        assert_eq!(parse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_line(""), LineEvent::Ignored);
        assert_eq!(parse_line(": keep-alive"), LineEvent::Ignored);
        assert_eq!(parse_line("data: {not json"), LineEvent::Ignored);
        assert_eq!(
            parse_line(r#"data: {"error":{"message":"overloaded"}}"#),
            LineEvent::Ignored
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            LineEvent::Ignored
        );
    }

    fn chunks<E>(parts: &[&str]) -> Vec<Result<Vec<u8>, E>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn malformed_event_does_not_abort_stream() {
        let source = chunks::<()>(&[
            "data: {oops}\n",
            r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#,
            "\n",
        ]);
        let out: Vec<_> = decode_fragments(stream::iter(source)).collect().await;
        assert_eq!(out, vec![Ok(Fragment::new(Channel::Content, "ok"))]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let mut source = chunks::<&str>(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"cho",
        ]);
        source.push(Err("reset"));
        source.extend(chunks(&["ices\":[]}\n"]));

        let out: Vec<_> = decode_fragments(stream::iter(source)).collect().await;
        assert_eq!(
            out,
            vec![Ok(Fragment::new(Channel::Content, "a")), Err("reset")]
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_flushed() {
        let source = chunks::<()>(&[r#"data: {"choices":[{"delta":{"reasoning":"tail"}}]}"#]);
        let out: Vec<_> = decode_fragments(stream::iter(source)).collect().await;
        assert_eq!(out, vec![Ok(Fragment::new(Channel::Reasoning, "tail"))]);
    }
}
