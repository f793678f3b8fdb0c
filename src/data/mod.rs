//! Sample buffering and log storage.
pub mod precision;
pub mod ring_buffer;
pub mod storage;
