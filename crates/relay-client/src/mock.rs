//! Mock transport for unit testing
//!
//! Records every handshake and frame in memory and can be told to fail
//! connects, fail or stall sends, or sever every open connection at once.

use crate::error::RelayError;
use crate::models::{Envelope, Handshake};
use crate::transport::{Connection, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockState {
    frames: Vec<String>,
    handshakes: Vec<Handshake>,
    connect_attempts: usize,
    closes: usize,
    failing_connects: usize,
    failing_sends: usize,
    stalling_sends: usize,
    // Bumped by `sever()`; connections from an older generation are dead
    generation: u64,
}

/// In-memory transport for tests.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.state().failing_connects = n;
    }

    /// Make the next `n` sends fail (on any connection)
    pub fn fail_next_sends(&self, n: usize) {
        self.state().failing_sends = n;
    }

    /// Make the next `n` sends never complete
    pub fn stall_next_sends(&self, n: usize) {
        self.state().stalling_sends = n;
    }

    /// Sever every connection opened so far
    pub fn sever(&self) {
        self.state().generation += 1;
    }

    /// Raw frames received, in order
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        self.state().frames.clone()
    }

    /// Frames decoded back into envelopes, in order
    #[must_use]
    pub fn delivered(&self) -> Vec<Envelope> {
        self.state()
            .frames
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Handshakes presented on each successful connect
    #[must_use]
    pub fn handshakes(&self) -> Vec<Handshake> {
        self.state().handshakes.clone()
    }

    /// Connect attempts, including failed ones
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state().connect_attempts
    }

    /// Connections explicitly closed
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state().closes
    }
}

/// Connection handed out by `MockTransport`.
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    generation: u64,
    closed: bool,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn connect(
        &self,
        _endpoint: &str,
        handshake: &Handshake,
    ) -> Result<MockConnection, RelayError> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RelayError::Connect("injected connect failure".to_string()));
        }
        state.handshakes.push(handshake.clone());
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            generation: state.generation,
            closed: false,
        })
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn send_text(&mut self, frame: String) -> Result<(), RelayError> {
        let stalled = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed {
                return Err(RelayError::Send("connection closed".to_string()));
            }
            if self.generation != state.generation {
                return Err(RelayError::Send("connection severed".to_string()));
            }
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(RelayError::Send("injected send failure".to_string()));
            }
            if state.stalling_sends > 0 {
                state.stalling_sends -= 1;
                true
            } else {
                state.frames.push(frame);
                false
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap_or_else(PoisonError::into_inner).closes += 1;
        }
    }
}
