//! Frame synchronization.
//!
//! A [`FrameSynchronizer`] turns an unbounded byte stream, delivered in chunks of
//! any size, into frames. Bytes that do not belong to a frame are reported as
//! noise; nothing is ever dropped silently. Unconsumed bytes persist across
//! [`FrameSynchronizer::feed`] calls, so the frames produced do not depend on how
//! the stream was chunked.
//!
//! Three delimiter strategies are supported:
//!
//! - [`Delimiter::Terminator`]: frames end with a fixed byte sequence.
//! - [`Delimiter::Marker`]: frames start with registration bytes and have a fixed
//!   length. A second marker inside the expected frame window means the previous
//!   frame was truncated; its bytes are reported as [`Segment::Corrupted`].
//! - [`Delimiter::Sentence`]: `\r\n` terminated text sentences starting with `$`
//!   or `!` (NMEA 0183).

use crate::config::{Framing, InstrumentConfig};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::ops::Range;

const SENTENCE_TERMINATOR: &[u8] = b"\r\n";

/// A delimited unit of raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    raw: Bytes,
    payload: Range<usize>,
    /// Arrival time of the read that completed the frame.
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Every byte of the frame, delimiters included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The frame without its terminator or registration bytes.
    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload.clone()]
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// One piece of synchronizer output, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Frame(Frame),
    Noise(Bytes),
    /// Marker-delimited frame cut short by the next marker.
    Corrupted(Bytes),
}

/// Everything produced by one `feed` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutput {
    pub segments: Vec<Segment>,
}

impl SyncOutput {
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Frame(f) => Some(f),
            _ => None,
        })
    }

    /// Number of corrupted frames.
    pub fn corrupted(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Corrupted(_)))
            .count()
    }

    /// Bytes not part of a valid frame, corrupted frames included.
    pub fn noise_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Noise(b) | Segment::Corrupted(b) => b.len(),
                Segment::Frame(_) => 0,
            })
            .sum()
    }

    /// Split into frames and the concatenated noise bytes.
    pub fn into_parts(self) -> (Vec<Frame>, Vec<u8>) {
        let mut frames = Vec::new();
        let mut noise = Vec::new();
        for segment in self.segments {
            match segment {
                Segment::Frame(f) => frames.push(f),
                Segment::Noise(b) | Segment::Corrupted(b) => noise.extend_from_slice(&b),
            }
        }
        (frames, noise)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Frame boundary rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimiter {
    Terminator(Vec<u8>),
    /// `frame_length` counts the bytes following the marker.
    Marker { marker: Vec<u8>, frame_length: usize },
    Sentence,
}

#[derive(Debug)]
pub struct FrameSynchronizer {
    delimiter: Delimiter,
    max_frame_length: usize,
    pending: BytesMut,
    /// Skipping an over-long line until its terminator.
    discarding: bool,
}

impl FrameSynchronizer {
    pub fn new(delimiter: Delimiter, max_frame_length: usize) -> Self {
        Self {
            delimiter,
            max_frame_length,
            pending: BytesMut::new(),
            discarding: false,
        }
    }

    pub fn for_config(cfg: &InstrumentConfig) -> Self {
        let delimiter = match &cfg.framing {
            Framing::Terminated { terminator, .. } => Delimiter::Terminator(terminator.clone()),
            Framing::Registered { registration, frame_length, .. } => Delimiter::Marker {
                marker: registration.clone(),
                frame_length: *frame_length,
            },
            Framing::Sentences => Delimiter::Sentence,
        };
        Self::new(delimiter, cfg.max_frame_length)
    }

    /// Bytes held back waiting for more input.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Consume a chunk; frames completed by it carry `timestamp`.
    pub fn feed(&mut self, bytes: &[u8], timestamp: DateTime<Utc>) -> SyncOutput {
        self.pending.extend_from_slice(bytes);
        let mut out = SyncOutput::default();
        match &self.delimiter {
            Delimiter::Terminator(terminator) => {
                let terminator = terminator.clone();
                self.split_terminated(&terminator, timestamp, &mut out, |_| true);
            }
            Delimiter::Sentence => {
                self.split_terminated(SENTENCE_TERMINATOR, timestamp, &mut out, |line| {
                    matches!(line.first(), Some(b'$' | b'!'))
                });
            }
            Delimiter::Marker { marker, frame_length } => {
                let (marker, frame_length) = (marker.clone(), *frame_length);
                self.split_marked(&marker, frame_length, timestamp, &mut out);
            }
        }
        out
    }

    /// Release every retained byte as noise (end of stream).
    pub fn flush(&mut self) -> Vec<u8> {
        self.discarding = false;
        self.pending.split().to_vec()
    }

    fn split_terminated(
        &mut self,
        terminator: &[u8],
        timestamp: DateTime<Utc>,
        out: &mut SyncOutput,
        accept: impl Fn(&[u8]) -> bool,
    ) {
        let keep = terminator.len().saturating_sub(1);
        loop {
            match find(&self.pending, terminator) {
                Some(i) => {
                    let end = i + terminator.len();
                    let chunk = self.pending.split_to(end).freeze();
                    if self.discarding || i > self.max_frame_length || !accept(&chunk[..i]) {
                        out.segments.push(Segment::Noise(chunk));
                    } else {
                        out.segments.push(Segment::Frame(Frame {
                            raw: chunk,
                            payload: 0..i,
                            timestamp,
                        }));
                    }
                    self.discarding = false;
                }
                None => {
                    // The last bytes may be the start of a split terminator.
                    let settled = self.pending.len().saturating_sub(keep);
                    if self.discarding || settled > self.max_frame_length {
                        self.discarding = true;
                        if settled > 0 {
                            out.segments.push(Segment::Noise(self.pending.split_to(settled).freeze()));
                        }
                    }
                    break;
                }
            }
        }
    }

    fn split_marked(
        &mut self,
        marker: &[u8],
        frame_length: usize,
        timestamp: DateTime<Utc>,
        out: &mut SyncOutput,
    ) {
        let m = marker.len();
        let total = m + frame_length;
        loop {
            let Some(start) = find(&self.pending, marker) else {
                let settled = self.pending.len().saturating_sub(m - 1);
                if settled > 0 {
                    out.segments.push(Segment::Noise(self.pending.split_to(settled).freeze()));
                }
                break;
            };
            if start > 0 {
                out.segments.push(Segment::Noise(self.pending.split_to(start).freeze()));
            }

            // A complete marker inside the frame window truncates this frame.
            let window_end = self.pending.len().min(total);
            let next = self
                .pending
                .get(m..window_end)
                .and_then(|window| find(window, marker))
                .map(|j| j + m);
            if let Some(next) = next {
                out.segments.push(Segment::Corrupted(self.pending.split_to(next).freeze()));
                continue;
            }
            if self.pending.len() < total {
                break;
            }
            out.segments.push(Segment::Frame(Frame {
                raw: self.pending.split_to(total).freeze(),
                payload: m..total,
                timestamp,
            }));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
