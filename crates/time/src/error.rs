use thiserror::Error;

use crate::codec::{CodecError, Opcode};
use crate::transport::TransportError;

/// Errors returned by every Time model entry point.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeModelError {
    #[error("{0} is outside its legal range")]
    InvalidParameter(&'static str),
    #[error("a time request is already outstanding")]
    Busy,
    #[error("a node with the Client role may not publish time")]
    Forbidden,
    #[error("time is unknown; nothing to publish")]
    InvalidState,
    #[error("no buffer available for an outgoing message")]
    ResourceExhausted,
    #[error("opcode {0:?} is not handled by this model")]
    UnsupportedOpcode(Opcode),
    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for TimeModelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NoBuffers => TimeModelError::ResourceExhausted,
            other => TimeModelError::Transport(other),
        }
    }
}

pub type Result<T, E = TimeModelError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_exhaustion_is_mapped_other_failures_pass_through() {
        assert_eq!(
            TimeModelError::from(TransportError::NoBuffers),
            TimeModelError::ResourceExhausted
        );
        assert_eq!(
            TimeModelError::from(TransportError::PublishAddressUnset),
            TimeModelError::Transport(TransportError::PublishAddressUnset)
        );
    }

    #[test]
    fn invalid_parameter_names_the_field() {
        let err = TimeModelError::InvalidParameter("time_zone_offset");
        assert_eq!(err.to_string(), "time_zone_offset is outside its legal range");
    }
}
