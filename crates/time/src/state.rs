//! Time, time zone and TAI-UTC delta state of one Time Server.
//!
//! Every setter validates its whole input before touching anything, so a
//! rejected call leaves the state exactly as it was.
//!
//! Scheduled zone and delta changes fire when the clock lands *exactly* on
//! the recorded TAI second. A clock update that jumps over that second
//! (e.g. `advance` by more than one second at a time) skips the change
//! entirely, and the pending value is never cleared once applied: moving
//! the clock back onto the same second applies it again. Hosts are expected
//! to advance the clock in steps of at most one second.

use tracing::debug;

use crate::codec::{
    tai_seconds_in_range, tai_utc_delta_in_range, zone_offset_in_range, TaiUtcDeltaStatusParams,
    TimeParams, ZoneStatusParams, TAI_UNKNOWN,
};
use crate::error::{Result, TimeModelError};
use crate::policy::Role;

const SUBSECONDS_PER_SECOND: u16 = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeState {
    tai_seconds: u64,
    subsecond: u8,
    uncertainty: u8,
    time_authority: bool,
    time_zone_offset_current: i16,
    time_zone_offset_new: i16,
    time_zone_change: u64,
    tai_utc_delta_current: i32,
    tai_utc_delta_new: i32,
    tai_utc_delta_change: u64,
    role: Role,
}

impl TimeState {
    /// Unknown time, no pending changes, no role.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tai_seconds(&self) -> u64 {
        self.tai_seconds
    }

    pub fn subsecond(&self) -> u8 {
        self.subsecond
    }

    pub fn uncertainty(&self) -> u8 {
        self.uncertainty
    }

    pub fn time_authority(&self) -> bool {
        self.time_authority
    }

    pub fn time_zone_offset_current(&self) -> i16 {
        self.time_zone_offset_current
    }

    pub fn time_zone_offset_new(&self) -> i16 {
        self.time_zone_offset_new
    }

    pub fn time_zone_change(&self) -> u64 {
        self.time_zone_change
    }

    pub fn tai_utc_delta_current(&self) -> i32 {
        self.tai_utc_delta_current
    }

    pub fn tai_utc_delta_new(&self) -> i32 {
        self.tai_utc_delta_new
    }

    pub fn tai_utc_delta_change(&self) -> u64 {
        self.tai_utc_delta_change
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_synchronized(&self) -> bool {
        self.tai_seconds != TAI_UNKNOWN
    }

    /// Overwrite the clock together with the current zone offset and delta.
    ///
    /// Pending transitions are kept. When the role dictates the authority
    /// flag (Authority, Relay, Client) the role wins over `params`.
    pub fn set_time(&mut self, params: &TimeParams) -> Result<()> {
        if !tai_seconds_in_range(params.tai_seconds) {
            return Err(reject("tai_seconds"));
        }
        if !tai_utc_delta_in_range(params.tai_utc_delta) {
            return Err(reject("tai_utc_delta"));
        }
        if !zone_offset_in_range(params.time_zone_offset) {
            return Err(reject("time_zone_offset"));
        }

        self.tai_seconds = params.tai_seconds;
        self.subsecond = params.subsecond;
        self.uncertainty = params.uncertainty;
        self.time_authority = self
            .role
            .implied_authority()
            .unwrap_or(params.time_authority);
        self.time_zone_offset_current = params.time_zone_offset;
        self.tai_utc_delta_current = params.tai_utc_delta;
        self.check_scheduled_transitions();
        Ok(())
    }

    /// Overwrite only the clock, e.g. from a local time source.
    pub fn update_time(&mut self, tai_seconds: u64, subsecond: u8) -> Result<()> {
        if !tai_seconds_in_range(tai_seconds) {
            return Err(reject("tai_seconds"));
        }
        self.tai_seconds = tai_seconds;
        self.subsecond = subsecond;
        self.check_scheduled_transitions();
        Ok(())
    }

    pub fn update_uncertainty(&mut self, uncertainty: u8) {
        self.uncertainty = uncertainty;
    }

    /// Schedule a zone offset change. `change_at == 0` disarms it.
    pub fn set_zone_transition(&mut self, offset_new: i16, change_at: u64) -> Result<()> {
        if !tai_seconds_in_range(change_at) {
            return Err(reject("time_zone_change"));
        }
        if !zone_offset_in_range(offset_new) {
            return Err(reject("time_zone_offset_new"));
        }
        self.time_zone_offset_new = offset_new;
        self.time_zone_change = change_at;
        Ok(())
    }

    /// Schedule a TAI-UTC delta change. `change_at == 0` disarms it.
    pub fn set_delta_transition(&mut self, delta_new: i32, change_at: u64) -> Result<()> {
        if !tai_seconds_in_range(change_at) {
            return Err(reject("tai_utc_delta_change"));
        }
        if !tai_utc_delta_in_range(delta_new) {
            return Err(reject("tai_utc_delta_new"));
        }
        self.tai_utc_delta_new = delta_new;
        self.tai_utc_delta_change = change_at;
        Ok(())
    }

    /// Switch role and re-derive the authority flag from it.
    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        if let Some(authority) = role.implied_authority() {
            self.time_authority = authority;
        }
    }

    /// Move the clock forward. Subsecond overflow carries into seconds.
    /// Fails without wrapping if the result leaves the 40-bit range.
    pub fn advance(&mut self, delta_seconds: u64, delta_subsecond: u8) -> Result<()> {
        let subsecond_total = u16::from(self.subsecond) + u16::from(delta_subsecond);
        let carry = u64::from(subsecond_total / SUBSECONDS_PER_SECOND);
        let tai_seconds = self
            .tai_seconds
            .checked_add(delta_seconds)
            .and_then(|tai| tai.checked_add(carry))
            .filter(|tai| tai_seconds_in_range(*tai))
            .ok_or_else(|| reject("tai_seconds"))?;

        self.tai_seconds = tai_seconds;
        self.subsecond = (subsecond_total % SUBSECONDS_PER_SECOND) as u8;
        self.check_scheduled_transitions();
        Ok(())
    }

    /// Adopt a status heard from the network. Decoded fields are always in range.
    pub(crate) fn adopt_status(&mut self, status: &TimeParams) {
        self.tai_seconds = status.tai_seconds;
        self.subsecond = status.subsecond;
        self.uncertainty = status.uncertainty;
        self.time_zone_offset_current = status.time_zone_offset;
        self.tai_utc_delta_current = status.tai_utc_delta;
        self.check_scheduled_transitions();
    }

    pub(crate) fn clear_authority(&mut self) {
        self.time_authority = false;
    }

    /// Snapshot for a Time Status message.
    pub fn time_status(&self) -> TimeParams {
        TimeParams {
            tai_seconds: self.tai_seconds,
            subsecond: self.subsecond,
            uncertainty: self.uncertainty,
            time_authority: self.time_authority,
            tai_utc_delta: self.tai_utc_delta_current,
            time_zone_offset: self.time_zone_offset_current,
        }
    }

    pub fn zone_status(&self) -> ZoneStatusParams {
        ZoneStatusParams {
            time_zone_offset_current: self.time_zone_offset_current,
            time_zone_offset_new: self.time_zone_offset_new,
            time_zone_change: self.time_zone_change,
        }
    }

    pub fn tai_utc_delta_status(&self) -> TaiUtcDeltaStatusParams {
        TaiUtcDeltaStatusParams {
            tai_utc_delta_current: self.tai_utc_delta_current,
            tai_utc_delta_new: self.tai_utc_delta_new,
            tai_utc_delta_change: self.tai_utc_delta_change,
        }
    }

    // Exact match only; see module docs.
    fn check_scheduled_transitions(&mut self) {
        if self.time_zone_change != TAI_UNKNOWN && self.tai_seconds == self.time_zone_change {
            debug!(
                tai_seconds = self.tai_seconds,
                from = self.time_zone_offset_current,
                to = self.time_zone_offset_new,
                "applying scheduled time zone change"
            );
            self.time_zone_offset_current = self.time_zone_offset_new;
        }

        if self.tai_utc_delta_change != TAI_UNKNOWN && self.tai_seconds == self.tai_utc_delta_change
        {
            debug!(
                tai_seconds = self.tai_seconds,
                from = self.tai_utc_delta_current,
                to = self.tai_utc_delta_new,
                "applying scheduled TAI-UTC delta change"
            );
            self.tai_utc_delta_current = self.tai_utc_delta_new;
        }
    }
}

fn reject(field: &'static str) -> TimeModelError {
    debug!(field, "rejecting out-of-range time parameter");
    TimeModelError::InvalidParameter(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        TAI_SECONDS_MAX, TAI_UTC_DELTA_MAX, TAI_UTC_DELTA_MIN, ZONE_OFFSET_MAX, ZONE_OFFSET_MIN,
    };
    use proptest::prelude::*;

    fn params(tai_seconds: u64) -> TimeParams {
        TimeParams {
            tai_seconds,
            subsecond: 12,
            uncertainty: 3,
            time_authority: true,
            tai_utc_delta: 37,
            time_zone_offset: 8,
        }
    }

    fn armed_state() -> TimeState {
        let mut state = TimeState::new();
        state.set_time(&params(90)).unwrap();
        state.set_zone_transition(-4, 100).unwrap();
        state.set_delta_transition(38, 100).unwrap();
        state
    }

    #[test]
    fn starts_unknown_and_roleless() {
        let state = TimeState::new();
        assert_eq!(state.tai_seconds(), 0);
        assert!(!state.is_synchronized());
        assert!(!state.time_authority());
        assert_eq!(state.role(), Role::None);
        assert_eq!(state.time_zone_change(), 0);
        assert_eq!(state.tai_utc_delta_change(), 0);
    }

    #[test]
    fn set_time_keeps_pending_transitions() {
        let mut state = armed_state();
        state.set_time(&params(95)).unwrap();
        assert_eq!(state.tai_seconds(), 95);
        assert_eq!(state.subsecond(), 12);
        assert_eq!(state.time_zone_offset_current(), 8);
        assert_eq!(state.time_zone_offset_new(), -4);
        assert_eq!(state.time_zone_change(), 100);
        assert_eq!(state.tai_utc_delta_new(), 38);
    }

    #[test]
    fn set_time_rejects_each_field_atomically() {
        let mut state = armed_state();
        let before = state;

        let mut bad = params(TAI_SECONDS_MAX + 1);
        assert_eq!(
            state.set_time(&bad),
            Err(TimeModelError::InvalidParameter("tai_seconds"))
        );
        bad = TimeParams {
            tai_utc_delta: TAI_UTC_DELTA_MAX + 1,
            ..params(5)
        };
        assert_eq!(
            state.set_time(&bad),
            Err(TimeModelError::InvalidParameter("tai_utc_delta"))
        );
        bad = TimeParams {
            time_zone_offset: ZONE_OFFSET_MIN - 1,
            ..params(5)
        };
        assert_eq!(
            state.set_time(&bad),
            Err(TimeModelError::InvalidParameter("time_zone_offset"))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn transitions_fire_on_exact_second_via_advance() {
        let mut state = armed_state();
        state.advance(9, 0).unwrap();
        assert_eq!(state.time_zone_offset_current(), 8);
        assert_eq!(state.tai_utc_delta_current(), 37);

        state.advance(1, 0).unwrap();
        assert_eq!(state.tai_seconds(), 100);
        assert_eq!(state.time_zone_offset_current(), -4);
        assert_eq!(state.tai_utc_delta_current(), 38);
        // pending slot is left in place
        assert_eq!(state.time_zone_change(), 100);
        assert_eq!(state.time_zone_offset_new(), -4);

        state.advance(1, 0).unwrap();
        assert_eq!(state.time_zone_offset_current(), -4);
    }

    #[test]
    fn set_time_landing_on_change_applies_it_in_the_same_call() {
        let mut state = armed_state();
        state.set_time(&params(100)).unwrap();
        assert_eq!(state.time_zone_offset_current(), -4);
        assert_eq!(state.tai_utc_delta_current(), 38);
    }

    #[test]
    fn coarse_steps_skip_the_transition() {
        let mut state = armed_state();
        state.advance(20, 0).unwrap();
        assert_eq!(state.tai_seconds(), 110);
        assert_eq!(state.time_zone_offset_current(), 8);
        assert_eq!(state.tai_utc_delta_current(), 37);
    }

    #[test]
    fn returning_to_the_change_second_reapplies_it() {
        let mut state = armed_state();
        state.update_time(100, 0).unwrap();
        assert_eq!(state.time_zone_offset_current(), -4);

        // A Time Set rolls the current offset back; the pending change stays armed.
        state.set_time(&params(50)).unwrap();
        assert_eq!(state.time_zone_offset_current(), 8);
        state.update_time(100, 0).unwrap();
        assert_eq!(state.time_zone_offset_current(), -4);
    }

    #[test]
    fn zero_change_means_nothing_pending() {
        let mut state = TimeState::new();
        state.set_zone_transition(20, 0).unwrap();
        state.set_delta_transition(100, 0).unwrap();
        state.set_time(&params(0)).unwrap();
        assert_eq!(state.time_zone_offset_current(), 8);
        assert_eq!(state.tai_utc_delta_current(), 37);
    }

    #[test]
    fn advance_carries_subseconds_and_refuses_to_wrap() {
        let mut state = TimeState::new();
        state.update_time(10, 200).unwrap();
        state.advance(0, 100).unwrap();
        assert_eq!(state.tai_seconds(), 11);
        assert_eq!(state.subsecond(), 44);

        state.update_time(TAI_SECONDS_MAX, 0).unwrap();
        let before = state;
        assert_eq!(
            state.advance(1, 0),
            Err(TimeModelError::InvalidParameter("tai_seconds"))
        );
        assert_eq!(
            state.advance(u64::MAX, 0),
            Err(TimeModelError::InvalidParameter("tai_seconds"))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn role_changes_rederive_authority() {
        let mut state = TimeState::new();
        state.set_role(Role::Authority);
        assert!(state.time_authority());
        state.set_role(Role::None);
        assert!(state.time_authority());
        state.set_role(Role::Relay);
        assert!(!state.time_authority());
        state.set_role(Role::None);
        assert!(!state.time_authority());
        state.set_role(Role::Client);
        assert!(!state.time_authority());
    }

    #[test]
    fn role_overrides_authority_supplied_by_set_time() {
        let mut state = TimeState::new();
        state.set_role(Role::Relay);
        state.set_time(&params(10)).unwrap();
        assert!(!state.time_authority());

        state.set_role(Role::Authority);
        state
            .set_time(&TimeParams {
                time_authority: false,
                ..params(10)
            })
            .unwrap();
        assert!(state.time_authority());

        let mut roleless = TimeState::new();
        roleless.set_time(&params(10)).unwrap();
        assert!(roleless.time_authority());
    }

    proptest! {
        #[test]
        fn out_of_range_zone_transition_is_a_no_op(
            offset in prop_oneof![i16::MIN..ZONE_OFFSET_MIN, (ZONE_OFFSET_MAX + 1)..=i16::MAX],
            change in 0..=TAI_SECONDS_MAX,
        ) {
            let mut state = armed_state();
            let before = state;
            prop_assert!(state.set_zone_transition(offset, change).is_err());
            prop_assert_eq!(state, before);
        }

        #[test]
        fn out_of_range_delta_transition_is_a_no_op(
            delta in prop_oneof![i32::MIN..TAI_UTC_DELTA_MIN, (TAI_UTC_DELTA_MAX + 1)..=i32::MAX],
            change in 0..=TAI_SECONDS_MAX,
        ) {
            let mut state = armed_state();
            let before = state;
            prop_assert!(state.set_delta_transition(delta, change).is_err());
            prop_assert_eq!(state, before);
        }

        #[test]
        fn out_of_range_change_instant_is_a_no_op(change in (TAI_SECONDS_MAX + 1)..=u64::MAX) {
            let mut state = armed_state();
            let before = state;
            prop_assert!(state.set_zone_transition(0, change).is_err());
            prop_assert!(state.set_delta_transition(0, change).is_err());
            prop_assert!(state.update_time(change, 0).is_err());
            prop_assert_eq!(state, before);
        }
    }
}
