//! In-memory transport for unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pulse_codec::FrameCodec;

use crate::connection::{Connection, ConnectionId, Transport};
use crate::errors::{Result, ServerError};
use crate::queue::PushOutcome;

#[derive(Default)]
pub(crate) struct MockTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    pings: Mutex<usize>,
    closes: Mutex<usize>,
    outcome: Mutex<Option<PushOutcome>>,
    fail: Mutex<bool>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    pub(crate) fn pings(&self) -> usize {
        *self.pings.lock()
    }

    pub(crate) fn close_count(&self) -> usize {
        *self.closes.lock()
    }

    pub(crate) fn set_outcome(&self, outcome: PushOutcome) {
        *self.outcome.lock() = Some(outcome);
    }

    pub(crate) fn fail_writes(&self) {
        *self.fail.lock() = true;
    }
}

impl Transport for Arc<MockTransport> {
    fn send_frame(&self, frame: Vec<u8>) -> Result<PushOutcome> {
        if *self.fail.lock() {
            return Err(ServerError::Write("broken pipe".into()));
        }
        if let Some(outcome) = *self.outcome.lock() {
            return Ok(outcome);
        }
        self.frames.lock().push(frame);
        Ok(PushOutcome::Queued)
    }

    fn ping(&self) -> Result<()> {
        if *self.fail.lock() {
            return Err(ServerError::Write("broken pipe".into()));
        }
        *self.pings.lock() += 1;
        Ok(())
    }

    fn close(&self) {
        *self.closes.lock() += 1;
    }

    fn capacity(&self) -> usize {
        16
    }
}

pub(crate) fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

/// A connection with no registry behind it.
pub(crate) fn detached(id: u64) -> (Connection, Arc<MockTransport>) {
    let mock = MockTransport::new();
    let conn = Connection::new(
        ConnectionId(id),
        peer(),
        Arc::new(FrameCodec::default()),
        Box::new(mock.clone()),
        Weak::new(),
    );
    (conn, mock)
}
