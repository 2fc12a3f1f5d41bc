// SPDX-License-Identifier: Apache-2.0

//! Minimal server-sent events reader over a `reqwest` byte stream.
//!
//! Yields one payload per event: the event's `data:` lines joined with `\n`,
//! dispatched on the blank line that ends it. A `[DONE]` payload ends the
//! stream. Other SSE fields (`event:`, `id:`, comments) are ignored.

use std::collections::VecDeque;
use std::pin::Pin;

use anyhow::Result;
use futures::{Stream, StreamExt, stream};

use crate::error::RepoMindError;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    body: ByteStream,
    buffer: Vec<u8>,
    data_lines: Vec<String>,
    pending: VecDeque<String>,
    finished: bool,
}

impl SseState {
    /// Moves complete lines out of the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            self.dispatch();
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            self.data_lines.push(data.to_string());
        }
    }

    /// Ends the current event.
    fn dispatch(&mut self) {
        if self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        if data == "[DONE]" {
            self.finished = true;
        } else if !data.is_empty() && !self.finished {
            self.pending.push_back(data);
        }
    }
}

/// Turns a streaming HTTP response into a stream of `data:` payloads.
pub fn data_events(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send {
    events_from(Box::pin(
        response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())),
    ))
}

fn events_from(body: ByteStream) -> impl Stream<Item = Result<String>> + Send {
    let state = SseState {
        body,
        buffer: Vec::new(),
        data_lines: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(RepoMindError::Network(e).into()), state));
                }
                None => {
                    // Flush a trailing line and an event missing its blank line.
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        state.push_line(&rest);
                    }
                    state.dispatch();
                    state.finished = true;
                }
            }
        }
    })
}
