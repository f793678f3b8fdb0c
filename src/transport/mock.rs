//! Scripted in-memory transport for tests and demos.
//!
//! A [`ScriptedTransport`] is a cheap handle on shared state: keep a clone to push
//! more steps or inspect the open/close history while an instrument owns another.

use super::Transport;
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One scripted read outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(Vec<u8>),
    Fail(TransportError),
    /// Sleep inside `read`, ignoring any cancellation, then return nothing.
    Block(Duration),
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    open_error: Option<TransportError>,
    open: bool,
    opens: usize,
    closes: usize,
}

#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    /// Read timeout used when the script is exhausted.
    idle: Duration,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            idle: Duration::from_millis(10),
        }
    }

    pub fn with_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        let transport = Self::new();
        for chunk in chunks {
            transport.push(ScriptStep::Chunk(chunk.into()));
        }
        transport
    }

    pub fn push(&self, step: ScriptStep) {
        self.state.lock().steps.push_back(step);
    }

    pub fn push_chunk(&self, chunk: impl Into<Vec<u8>>) {
        self.push(ScriptStep::Chunk(chunk.into()));
    }

    /// Make the next `open` fail with `err`.
    pub fn fail_open(&self, err: TransportError) {
        self.state.lock().open_error = Some(err);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().steps.len()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(err) = state.open_error.take() {
            return Err(err);
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let step = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::Other("scripted transport is not open".into()));
            }
            state.steps.pop_front()
        };
        match step {
            Some(ScriptStep::Chunk(bytes)) => Ok(bytes),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Block(duration)) => {
                std::thread::sleep(duration);
                Ok(Vec::new())
            }
            None => {
                std::thread::sleep(self.idle);
                Ok(Vec::new())
            }
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}
