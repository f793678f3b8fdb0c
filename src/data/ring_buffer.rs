//! Fixed-capacity sample buffers for the live view.
//!
//! A [`RingBuffer`] holds the last N samples of one channel, evicting the oldest
//! first. A [`SampleBuffer`] groups a timestamp ring with one ring per plotted
//! channel and is re-created whenever the number of plotted channels changes.
//!
//! The reader thread is the only writer. Consumers read through a [`LiveView`],
//! which takes a consistent copy under a read lock (a snapshot never observes a
//! half-written sample) and limits how often a consumer refreshes.
//!
//! # Memory Layout
//! ```text
//! get(N) after 3 writes, N = 5:
//!   [NaN, NaN, s0, s1, s2]        oldest -> newest, left padded
//! ```

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circular buffer of `f64` samples with FIFO eviction.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    data: VecDeque<f64>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for value in values {
            self.push(value);
        }
    }

    /// The last `n` samples in write order, left padded with NaN when fewer were written.
    pub fn get(&self, n: usize) -> Vec<f64> {
        let available = self.data.len().min(n);
        let mut out = vec![f64::NAN; n - available];
        out.extend(self.data.iter().skip(self.data.len() - available));
        out
    }

    /// The whole buffer as a fixed-size array of `capacity` entries.
    pub fn snapshot(&self) -> Vec<f64> {
        self.get(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Consistent copy of a [`SampleBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Seconds since the Unix epoch, NaN padded like the channels.
    pub timestamps: Vec<f64>,
    pub channels: Vec<Vec<f64>>,
    pub names: Vec<String>,
}

/// Timestamp ring plus one ring per plotted channel.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    capacity: usize,
    timestamps: RingBuffer,
    channels: Vec<RingBuffer>,
    names: Vec<String>,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            timestamps: RingBuffer::new(capacity),
            channels: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Append one sample per channel.
    ///
    /// When the number of values differs from the current channel count the buffer
    /// is re-created, as the plotted channels changed.
    pub fn push(&mut self, timestamp: f64, values: &[f64], names: &[String]) {
        if values.len() != self.channels.len() || names != self.names.as_slice() {
            self.reset(values.len(), names);
        }
        self.timestamps.push(timestamp);
        for (ring, value) in self.channels.iter_mut().zip(values) {
            ring.push(*value);
        }
    }

    fn reset(&mut self, channels: usize, names: &[String]) {
        self.timestamps.clear();
        self.channels = (0..channels).map(|_| RingBuffer::new(self.capacity)).collect();
        self.names = names.to_vec();
    }

    /// Drop every sample and channel.
    pub fn clear(&mut self) {
        self.reset(0, &[]);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            timestamps: self.timestamps.snapshot(),
            channels: self.channels.iter().map(RingBuffer::snapshot).collect(),
            names: self.names.clone(),
        }
    }
}

/// Consumer handle on an instrument's live buffer.
#[derive(Debug, Clone)]
pub struct LiveView {
    buffer: Arc<RwLock<SampleBuffer>>,
    min_interval: Duration,
    last_refresh: Option<Instant>,
}

impl LiveView {
    pub(crate) fn new(buffer: Arc<RwLock<SampleBuffer>>, max_refresh_rate_hz: f64) -> Self {
        Self {
            buffer,
            min_interval: Duration::from_secs_f64(1.0 / max_refresh_rate_hz),
            last_refresh: None,
        }
    }

    /// Unthrottled consistent copy of the buffer.
    pub fn snapshot(&self) -> Snapshot {
        self.buffer.read().snapshot()
    }

    /// Snapshot for a display refresh, `None` when called faster than the maximum refresh rate.
    pub fn refresh(&mut self, now: Instant) -> Option<Snapshot> {
        if let Some(last) = self.last_refresh {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_refresh = Some(now);
        Some(self.snapshot())
    }

    /// Forget plotted history (the "clear plot" command).
    pub fn clear(&self) {
        self.buffer.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_padded_when_not_full() {
        let mut rb = RingBuffer::new(5);
        rb.extend([1.0, 2.0, 3.0]);

        let out = rb.snapshot();
        assert_eq!(out.len(), 5);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(&out[2..], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut rb = RingBuffer::new(240);
        rb.extend((0..1000).map(f64::from));

        let out = rb.snapshot();
        assert_eq!(out.len(), 240);
        assert_eq!(out[0], 760.0);
        assert_eq!(out[239], 999.0);
        assert!(out.windows(2).all(|w| w[1] == w[0] + 1.0));
    }

    #[test]
    fn test_get_fewer_than_capacity() {
        let mut rb = RingBuffer::new(10);
        rb.extend([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rb.get(2), vec![3.0, 4.0]);
        assert_eq!(rb.len(), 4);
    }

    #[test]
    fn test_sample_buffer_recreated_on_channel_change() {
        let names2 = vec!["a".to_string(), "b".to_string()];
        let names1 = vec!["a".to_string()];
        let mut buffer = SampleBuffer::new(4);
        buffer.push(1.0, &[1.0, 10.0], &names2);
        buffer.push(2.0, &[2.0, 20.0], &names2);
        assert_eq!(buffer.channel_count(), 2);

        buffer.push(3.0, &[3.0], &names1);
        let snap = buffer.snapshot();
        assert_eq!(snap.channels.len(), 1);
        assert_eq!(snap.names, names1);
        assert!(snap.timestamps[..3].iter().all(|t| t.is_nan()));
        assert_eq!(snap.timestamps[3], 3.0);
        assert_eq!(snap.channels[0][3], 3.0);
    }

    #[test]
    fn test_live_view_rate_limit() {
        let buffer = Arc::new(RwLock::new(SampleBuffer::new(8)));
        let mut view = LiveView::new(buffer, 4.0);
        let t0 = Instant::now();

        assert!(view.refresh(t0).is_some());
        assert!(view.refresh(t0 + Duration::from_millis(100)).is_none());
        assert!(view.refresh(t0 + Duration::from_millis(250)).is_some());
    }

    #[test]
    fn test_concurrent_snapshot_is_consistent() {
        let buffer = Arc::new(RwLock::new(SampleBuffer::new(64)));
        let names = vec!["x".to_string(), "y".to_string()];
        let writer_buffer = Arc::clone(&buffer);
        let writer = std::thread::spawn(move || {
            for i in 0..5000 {
                let v = f64::from(i);
                writer_buffer.write().push(v, &[v, v], &names);
            }
        });

        let view = LiveView::new(buffer, 1000.0);
        for _ in 0..200 {
            let snap = view.snapshot();
            // Both channels and the timestamps were written together.
            for ch in &snap.channels {
                for (a, b) in ch.iter().zip(&snap.timestamps) {
                    assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
                }
            }
        }
        writer.join().unwrap();
    }
}
