//! Callbacks invoked by the session loops.

use pulse_codec::Envelope;

/// Receives decoded frames and session transitions.
///
/// Called from the read loop; long work should be handed off.
pub trait ClientHandler: Send + Sync + 'static {
    /// A session came up.
    fn on_connected(&self) {}

    /// One decoded frame from the server.
    fn on_message(&self, envelope: Envelope);

    /// The session ended, for whatever reason.
    fn on_disconnected(&self) {}
}

impl<F> ClientHandler for F
where
    F: Fn(Envelope) + Send + Sync + 'static,
{
    fn on_message(&self, envelope: Envelope) {
        self(envelope);
    }
}
