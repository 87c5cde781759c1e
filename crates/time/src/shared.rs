//! Thread-safe handle around a [`TimeSetupServer`].
//!
//! The mesh stack and the host clock usually run on different threads. Both
//! go through this handle so every handler runs to completion under one lock.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::ServerSettings;
use crate::error::Result;
use crate::setup_server::TimeSetupServer;
use crate::state::TimeState;
use crate::transport::{deliver, InboundMessage, MeshTransport, Outbox};

#[derive(Debug, Clone)]
pub struct SharedSetupServer {
    inner: Arc<Mutex<TimeSetupServer>>,
}

impl SharedSetupServer {
    pub fn new(server: TimeSetupServer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(server)),
        }
    }

    pub fn with_settings(settings: ServerSettings) -> Self {
        Self::new(TimeSetupServer::new(settings))
    }

    pub fn lock(&self) -> MutexGuard<'_, TimeSetupServer> {
        self.inner.lock()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> TimeState {
        *self.inner.lock().state()
    }

    /// Handle one inbound message and deliver the result. The lock is
    /// released before the transport is called.
    pub fn dispatch<T>(&self, transport: &mut T, inbound: &InboundMessage<'_>) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        let local = transport.local_unicast_address();
        let outbox = self.inner.lock().handle(inbound, local)?;
        deliver(transport, &outbox)
    }

    /// Host clock tick.
    pub fn advance(&self, delta_seconds: u64, delta_subsecond: u8) -> Result<()> {
        self.inner
            .lock()
            .server_mut()
            .advance(delta_seconds, delta_subsecond)
    }

    pub fn on_publish_period(&self) -> Result<Outbox> {
        self.inner.lock().server_mut().on_publish_period()
    }
}
