//! Time Client: queries a remote Time Server with an acknowledged Time Get.
//!
//! At most one query is in flight per client. The transport owns retries
//! and the timer; the host feeds the outcome back through
//! [`TimeClient::handle_message`] or [`TimeClient::handle_timeout`].

use tracing::{debug, trace, warn};

use crate::codec::{Message, Opcode, TimeParams};
use crate::config::ClientSettings;
use crate::error::{Result, TimeModelError};
use crate::server::NoopEvents;
use crate::transport::{AccessMessage, InboundMessage, MeshTransport, ReliableRequest, RxMeta};

pub const TIME_CLIENT_MODEL_ID: u16 = 0x1202;

/// Opcodes the Time Client subscribes to.
pub const TIME_CLIENT_OPCODES: [Opcode; 1] = [Opcode::TimeStatus];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientState {
    #[default]
    Idle,
    AwaitingStatus,
}

/// How an outstanding query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeQueryOutcome {
    Status(TimeParams),
    TimedOut,
    Cancelled,
}

pub trait TimeClientEvents: Send {
    /// The outstanding query finished, successfully or not.
    fn on_query_complete(&mut self, _outcome: &TimeQueryOutcome) {}

    /// A Time Status arrived that did not answer a query of ours.
    fn on_time_status(&mut self, _meta: &RxMeta, _status: &TimeParams) {}

    /// The client model's publish period elapsed.
    fn on_publish_period(&mut self) {}
}

impl TimeClientEvents for NoopEvents {}

pub struct TimeClient {
    settings: ClientSettings,
    state: ClientState,
    events: Box<dyn TimeClientEvents>,
}

impl std::fmt::Debug for TimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeClient")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TimeClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_events(settings, Box::new(NoopEvents))
    }

    pub fn with_events(settings: ClientSettings, events: Box<dyn TimeClientEvents>) -> Self {
        Self {
            settings,
            state: ClientState::Idle,
            events,
        }
    }

    pub fn register<T>(&self, transport: &mut T) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        transport.register_handlers(TIME_CLIENT_MODEL_ID, &TIME_CLIENT_OPCODES)?;
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Send an acknowledged Time Get. Fails with `Busy` while a previous
    /// query is still outstanding; a transport failure leaves the client idle.
    pub fn request_time<T>(&mut self, transport: &mut T) -> Result<()>
    where
        T: MeshTransport + ?Sized,
    {
        if self.state != ClientState::Idle {
            return Err(TimeModelError::Busy);
        }

        let request = ReliableRequest {
            message: AccessMessage::from(Message::TimeGet)
                .with_options(self.settings.force_segmented, self.settings.transmic_size),
            reply_opcode: Opcode::TimeStatus,
            timeout: self.settings.timeout(),
        };
        transport.reliable_request(&request).inspect_err(|err| {
            warn!(%err, "time get could not be sent");
        })?;

        self.state = ClientState::AwaitingStatus;
        debug!(timeout_ms = request.timeout.as_millis() as u64, "time get sent");
        Ok(())
    }

    /// Feed an inbound Time Status to the client.
    pub fn handle_message(&mut self, inbound: &InboundMessage<'_>) -> Result<()> {
        let status = match inbound.decode()? {
            Message::TimeStatus(status) => status,
            other => return Err(TimeModelError::UnsupportedOpcode(other.opcode())),
        };

        if self.state == ClientState::AwaitingStatus {
            self.finish(TimeQueryOutcome::Status(status));
        } else {
            trace!(src = %inbound.meta.src, tai_seconds = status.tai_seconds, "unsolicited time status");
            self.events.on_time_status(&inbound.meta, &status);
        }
        Ok(())
    }

    /// The transport gave up on the outstanding query.
    pub fn handle_timeout(&mut self) {
        if self.state == ClientState::AwaitingStatus {
            self.finish(TimeQueryOutcome::TimedOut);
        }
    }

    /// Abandon the outstanding query, if any.
    pub fn cancel(&mut self) {
        if self.state == ClientState::AwaitingStatus {
            self.finish(TimeQueryOutcome::Cancelled);
        }
    }

    pub fn on_publish_period(&mut self) {
        self.events.on_publish_period();
    }

    fn finish(&mut self, outcome: TimeQueryOutcome) {
        debug!(?outcome, "time query finished");
        self.state = ClientState::Idle;
        self.events.on_query_complete(&outcome);
    }
}
