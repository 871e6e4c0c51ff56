//! Server-Sent Events (SSE) streaming support.
//!
//! All three upstream APIs stream their responses as SSE. This module turns a
//! reqwest response into parsed events and drives a provider-specific
//! [`StreamDecoder`] over them to produce canonical events.

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use super::base::EventStream;
use crate::errors::UpstreamError;
use crate::models::event::CanonicalEvent;

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (e.g. "content_block_delta"), when the upstream names it.
    pub event: Option<String>,
    /// The event data, multiple `data:` lines joined by newlines.
    pub data: String,
}

impl SseEvent {
    pub fn data<S: Into<String>>(data: S) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named<E: Into<String>, S: Into<String>>(event: E, data: S) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

/// Line-level SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: String,
}

impl SseParser {
    /// Feed one line (without its terminator), returning an event when the line completes one
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return self.flush();
        }

        if let Some(event_type) = field(line, "event") {
            self.event = Some(event_type.to_string());
        } else if let Some(data) = field(line, "data") {
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(data);
        }
        // id:, retry: and comments are ignored
        None
    }

    /// Emit whatever event is pending
    pub fn flush(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
        })
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Read a streaming response body as SSE events
pub fn events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseEvent, UpstreamError>> + Send + 'static {
    try_stream! {
        let byte_stream = response
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));
        let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
        let mut lines = reader.lines();
        let mut parser = SseParser::default();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| UpstreamError::generic(format!("Stream read error: {}", e)))?
        {
            if let Some(event) = parser.push_line(&line) {
                yield event;
            }
        }

        if let Some(event) = parser.flush() {
            yield event;
        }
    }
}

/// Provider-specific translation of SSE events into canonical events
pub trait StreamDecoder: Send + 'static {
    /// Translate one upstream event. May return any number of canonical events,
    /// including the terminal `Finish`.
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<CanonicalEvent>, UpstreamError>;

    /// Called when the upstream body ends before a `Finish` was produced
    fn finish(&mut self) -> Vec<CanonicalEvent>;
}

/// Drive a decoder over a streaming response
pub fn decode<D: StreamDecoder>(response: reqwest::Response, mut decoder: D) -> EventStream {
    Box::pin(try_stream! {
        let events = events(response);
        pin_mut!(events);
        let mut finished = false;

        while let Some(event) = events.next().await {
            let event = event?;
            for out in decoder.decode(&event)? {
                finished = finished || matches!(out, CanonicalEvent::Finish(_));
                yield out;
            }
            if finished {
                break;
            }
        }

        if !finished {
            for out in decoder.finish() {
                yield out;
            }
        }
    })
}

/// Run a decoder over a scripted event sequence, the way [`decode`] would
#[cfg(test)]
pub(crate) fn decode_all<D: StreamDecoder>(
    mut decoder: D,
    events: &[SseEvent],
) -> Result<Vec<CanonicalEvent>, UpstreamError> {
    let mut out = Vec::new();
    for event in events {
        out.extend(decoder.decode(event)?);
        if out.iter().any(|e| matches!(e, CanonicalEvent::Finish(_))) {
            return Ok(out);
        }
    }
    out.extend(decoder.finish());
    Ok(out)
}
