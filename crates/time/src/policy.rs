//! Time role policy.
//!
//! Decides what a node does with a Time Status it hears on the network.
//! Nodes with no role or the Authority role never adopt network time.
//! Relays only re-publish status that carried the authority bit, and what
//! they re-publish is always non-authoritative; that is what stops two
//! relays in range of each other from echoing the same update forever.

use serde::{Deserialize, Serialize};

use crate::codec::TimeParams;

/// Behavioural mode of a Time Server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    /// Does not take part in time propagation.
    #[default]
    None = 0x00,
    /// Owns a time source; publishes and never listens.
    Authority = 0x01,
    /// Adopts network time and re-publishes authoritative updates.
    Relay = 0x02,
    /// Adopts network time and never publishes it.
    Client = 0x03,
}

impl Role {
    pub const fn value(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Role::None),
            0x01 => Some(Role::Authority),
            0x02 => Some(Role::Relay),
            0x03 => Some(Role::Client),
            _ => None,
        }
    }

    /// Time authority flag forced by this role. `None` leaves the flag alone.
    pub const fn implied_authority(self) -> Option<bool> {
        match self {
            Role::Authority => Some(true),
            Role::Relay | Role::Client => Some(false),
            Role::None => None,
        }
    }

    /// Whether a node in this role may put its own time status on the network.
    pub const fn may_publish(self) -> bool {
        !matches!(self, Role::Client)
    }

    const fn adopts_network_time(self) -> bool {
        matches!(self, Role::Relay | Role::Client)
    }
}

/// Why an inbound status was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Role is None or Authority.
    RoleDoesNotSync,
    /// The status came from this node's own unicast address.
    OwnEcho,
}

/// Outcome of [`decide_inbound_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDecision {
    Ignore(IgnoreReason),
    /// Adopt the status into local state.
    Accept,
    /// Adopt, then publish the updated state with the authority bit cleared.
    AcceptAndRelay,
}

impl StatusDecision {
    pub const fn accepts(self) -> bool {
        !matches!(self, StatusDecision::Ignore(_))
    }
}

/// Pure decision for a Time Status received by a node in `role`.
pub fn decide_inbound_status(
    role: Role,
    status: &TimeParams,
    source_is_self: bool,
) -> StatusDecision {
    if !role.adopts_network_time() {
        return StatusDecision::Ignore(IgnoreReason::RoleDoesNotSync);
    }
    if source_is_self {
        return StatusDecision::Ignore(IgnoreReason::OwnEcho);
    }
    if role == Role::Relay && status.time_authority {
        StatusDecision::AcceptAndRelay
    } else {
        StatusDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(authority: bool) -> TimeParams {
        TimeParams {
            tai_seconds: 1_000,
            time_authority: authority,
            ..TimeParams::default()
        }
    }

    #[test]
    fn role_byte_mapping() {
        for role in [Role::None, Role::Authority, Role::Relay, Role::Client] {
            assert_eq!(Role::from_u8(role.value()), Some(role));
        }
        assert_eq!(Role::from_u8(0x04), None);
        assert_eq!(Role::from_u8(0xFF), None);
    }

    #[test]
    fn implied_authority_matrix() {
        assert_eq!(Role::Authority.implied_authority(), Some(true));
        assert_eq!(Role::Relay.implied_authority(), Some(false));
        assert_eq!(Role::Client.implied_authority(), Some(false));
        assert_eq!(Role::None.implied_authority(), None);
    }

    #[test]
    fn none_and_authority_never_adopt() {
        for role in [Role::None, Role::Authority] {
            for authority in [true, false] {
                assert_eq!(
                    decide_inbound_status(role, &status(authority), false),
                    StatusDecision::Ignore(IgnoreReason::RoleDoesNotSync)
                );
            }
        }
    }

    #[test]
    fn own_echo_is_dropped() {
        for role in [Role::Relay, Role::Client] {
            let decision = decide_inbound_status(role, &status(true), true);
            assert_eq!(decision, StatusDecision::Ignore(IgnoreReason::OwnEcho));
            assert!(!decision.accepts());
        }
    }

    #[test]
    fn relay_only_forwards_authoritative_status() {
        assert_eq!(
            decide_inbound_status(Role::Relay, &status(true), false),
            StatusDecision::AcceptAndRelay
        );
        assert_eq!(
            decide_inbound_status(Role::Relay, &status(false), false),
            StatusDecision::Accept
        );
    }

    #[test]
    fn client_accepts_without_forwarding() {
        for authority in [true, false] {
            assert_eq!(
                decide_inbound_status(Role::Client, &status(authority), false),
                StatusDecision::Accept
            );
        }
    }
}
