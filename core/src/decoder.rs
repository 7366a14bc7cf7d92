//! Reassembles discrete JSON event frames out of a raw text stream.
//!
//! The wire format is one event per line, `data: <json>\n`, closed by a
//! literal `[DONE]` sentinel. Chunks may split a line anywhere; the decoder
//! buffers the trailing partial line between calls. It carries no session
//! semantics at all.

use opstream_protocol::EventFrame;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Event(EventFrame),
    /// Explicit close marker; the stream carries nothing useful after it.
    Done,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk; returns every complete frame it finished.
    ///
    /// A malformed JSON line is dropped with a warning and never aborts
    /// decoding of subsequent lines.
    pub fn decode_chunk(&mut self, chunk: &str) -> Vec<DecodedFrame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(frame) = decode_line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush any buffered trailing line once the stream is closed.
    pub fn finish(&mut self) -> Vec<DecodedFrame> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        decode_line(line.trim_end_matches(['\n', '\r']))
            .into_iter()
            .collect()
    }

    /// Bytes currently held back as an incomplete line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &str) -> Option<DecodedFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    // The sentinel shows up both bare and wrapped in the data envelope.
    if trimmed == DONE_SENTINEL {
        return Some(DecodedFrame::Done);
    }

    let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) else {
        // Not an event line (keep-alive comments and the like).
        return None;
    };
    let payload = payload.trim_start();
    if payload == DONE_SENTINEL {
        return Some(DecodedFrame::Done);
    }

    match serde_json::from_str::<EventFrame>(payload) {
        Ok(frame) => Some(DecodedFrame::Event(frame)),
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed event frame");
            None
        }
    }
}
