//! A recording implementation of the host socket seam.

use relay_server::{HostSocket, SocketClosed};
use std::sync::{Arc, Mutex, PoisonError};

/// Records every frame, close and attachment the connection manager
/// issues, and can be flipped to a disconnected state.
pub struct MockSocket {
    sent: Mutex<Vec<String>>,
    closed: Mutex<Option<(u16, String)>>,
    attachment: Mutex<Option<Vec<u8>>>,
    connected: Mutex<bool>,
}

impl MockSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(MockSocket {
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            attachment: Mutex::new(None),
            connected: Mutex::new(true),
        })
    }

    /// A socket that already carries an attachment, as a host presents one
    /// on wake after eviction.
    pub fn with_attachment(bytes: Vec<u8>) -> Arc<Self> {
        let socket = MockSocket::new();
        *socket
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(bytes);
        socket
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stored_attachment(&self) -> Option<Vec<u8>> {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every later `send` fail, as a dead peer would.
    pub fn disconnect(&self) {
        *self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl HostSocket for MockSocket {
    fn send(&self, text: String) -> Result<(), SocketClosed> {
        if !*self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(SocketClosed);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((code, reason.to_owned()));
        *self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn serialize_attachment(&self, bytes: Vec<u8>) {
        *self
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(bytes);
    }

    fn deserialize_attachment(&self) -> Option<Vec<u8>> {
        self.attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
