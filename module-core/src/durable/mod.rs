//! Reset-surviving controller record and the watchdog guard around hardware steps.
//!
//! The firmware places one [`DurableState`] in memory that the startup code does
//! not initialise. Its contents are trusted only when the reset cause is the
//! watchdog and the signature plus checksum still validate; every other reset
//! cause rebuilds the record from [`DurableState::cold`]. The record is kept as
//! plain integers so any bit pattern left in RAM can be inspected safely before
//! it is decoded.

use core::fmt;
use core::time::Duration;

use crate::power::ModuleState;

/// Marker stored in [`DurableState::signature`] once the record is initialised.
pub const DURABLE_SIGNATURE: u32 = 0x4D43_5253;

/// Marks the bounded hardware operation that was running when a reset hit.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RecoveryTag {
    #[default]
    Normal,
    RelayOn,
    RelayOff,
    SwitchOn,
    SwitchOff,
}

impl RecoveryTag {
    /// Encodes the tag for durable storage.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RecoveryTag::Normal => 0,
            RecoveryTag::RelayOn => 1,
            RecoveryTag::RelayOff => 2,
            RecoveryTag::SwitchOn => 3,
            RecoveryTag::SwitchOff => 4,
        }
    }

    /// Decodes a stored tag.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RecoveryTag::Normal),
            1 => Some(RecoveryTag::RelayOn),
            2 => Some(RecoveryTag::RelayOff),
            3 => Some(RecoveryTag::SwitchOn),
            4 => Some(RecoveryTag::SwitchOff),
            _ => None,
        }
    }
}

impl fmt::Display for RecoveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecoveryTag::Normal => "normal",
            RecoveryTag::RelayOn => "relay-on",
            RecoveryTag::RelayOff => "relay-off",
            RecoveryTag::SwitchOn => "switch-on",
            RecoveryTag::SwitchOff => "switch-off",
        };
        f.write_str(label)
    }
}

/// Reason reported by the reset controller for the most recent boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetCause {
    PowerOn,
    External,
    BrownOut,
    Watchdog,
    Software,
    Unknown,
}

/// Outcome of inspecting the durable record at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootPath {
    /// All state was rebuilt from defaults.
    ColdStart,
    /// The record survived a watchdog reset; the interrupted step is reported.
    Resume(RecoveryTag),
}

/// Watchdog timeout armed around hardware steps.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WatchdogLeash {
    /// Bounds a single relay or switch operation.
    Short,
    /// Normal operation between steps.
    Long,
}

impl WatchdogLeash {
    #[must_use]
    pub const fn timeout(self) -> Duration {
        match self {
            WatchdogLeash::Short => Duration::from_millis(15),
            WatchdogLeash::Long => Duration::from_secs(2),
        }
    }
}

/// Independent watchdog abstraction.
pub trait Watchdog {
    /// Re-arms the watchdog with a new timeout. Implementations feed as part of the change.
    fn set_leash(&mut self, leash: WatchdogLeash);

    /// Restarts the current timeout.
    fn feed(&mut self);
}

/// Watchdog stand-in for hosts; remembers the armed leash.
#[derive(Debug)]
pub struct NoopWatchdog {
    leash: WatchdogLeash,
    short_arms: u32,
    feeds: u32,
}

impl NoopWatchdog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            leash: WatchdogLeash::Long,
            short_arms: 0,
            feeds: 0,
        }
    }

    #[must_use]
    pub const fn leash(&self) -> WatchdogLeash {
        self.leash
    }

    /// Number of times the short leash was armed.
    #[must_use]
    pub const fn short_arms(&self) -> u32 {
        self.short_arms
    }

    #[must_use]
    pub const fn feeds(&self) -> u32 {
        self.feeds
    }
}

impl Default for NoopWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for NoopWatchdog {
    fn set_leash(&mut self, leash: WatchdogLeash) {
        if leash == WatchdogLeash::Short {
            self.short_arms = self.short_arms.wrapping_add(1);
        }
        self.leash = leash;
    }

    fn feed(&mut self) {
        self.feeds = self.feeds.wrapping_add(1);
    }
}

/// Controller state that survives a watchdog reset.
///
/// Every setter reseals the checksum so a reset landing between two writes
/// leaves either the old or the new value, never a record that validates with
/// torn contents.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DurableState {
    signature: u32,
    recovery: u8,
    current: u8,
    target: u8,
    max: u8,
    registration_id: u8,
    registered: u8,
    state_of_charge: u8,
    state_of_health: u8,
    watchdog_resets: u16,
    checksum: u16,
}

impl DurableState {
    /// Record contents after a power-on or external reset.
    #[must_use]
    pub const fn cold() -> Self {
        let mut state = Self {
            signature: DURABLE_SIGNATURE,
            recovery: RecoveryTag::Normal.to_raw(),
            current: ModuleState::Init.to_raw(),
            target: ModuleState::DEFAULT.to_raw(),
            max: ModuleState::DEFAULT.to_raw(),
            registration_id: 0,
            registered: 0,
            state_of_charge: 0,
            state_of_health: 0,
            watchdog_resets: 0,
            checksum: 0,
        };
        state.checksum = state.compute_checksum();
        state
    }

    /// Applies the preservation contract to a snapshot read at boot.
    ///
    /// Only a watchdog reset with an intact record resumes; the returned
    /// record then carries an incremented watchdog reset count.
    #[must_use]
    pub fn resume(snapshot: Self, cause: ResetCause) -> (Self, BootPath) {
        if cause != ResetCause::Watchdog || !snapshot.is_valid() {
            return (Self::cold(), BootPath::ColdStart);
        }

        let mut state = snapshot;
        state.watchdog_resets = state.watchdog_resets.saturating_add(1);
        state.seal();
        (state, BootPath::Resume(state.recovery_tag()))
    }

    /// Returns `true` when the signature, checksum, and every encoded field decode.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.signature == DURABLE_SIGNATURE
            && self.checksum == self.compute_checksum()
            && RecoveryTag::from_raw(self.recovery).is_some()
            && ModuleState::from_raw(self.current).is_some()
            && ModuleState::from_raw(self.target).is_some()
            && ModuleState::from_raw(self.max).is_some()
            && self.registered <= 1
    }

    #[must_use]
    pub fn recovery_tag(&self) -> RecoveryTag {
        RecoveryTag::from_raw(self.recovery).unwrap_or_default()
    }

    pub fn set_recovery_tag(&mut self, tag: RecoveryTag) {
        self.recovery = tag.to_raw();
        self.seal();
    }

    #[must_use]
    pub fn current(&self) -> ModuleState {
        ModuleState::from_raw(self.current).unwrap_or(ModuleState::Init)
    }

    pub fn set_current(&mut self, state: ModuleState) {
        self.current = state.to_raw();
        self.seal();
    }

    #[must_use]
    pub fn target(&self) -> ModuleState {
        ModuleState::from_raw(self.target).unwrap_or(ModuleState::DEFAULT)
    }

    pub fn set_target(&mut self, state: ModuleState) {
        self.target = state.to_raw();
        self.seal();
    }

    #[must_use]
    pub fn max(&self) -> ModuleState {
        ModuleState::from_raw(self.max).unwrap_or(ModuleState::DEFAULT)
    }

    pub fn set_max(&mut self, state: ModuleState) {
        self.max = state.to_raw();
        self.seal();
    }

    /// Registration id assigned by the pack controller; 0 while unregistered.
    #[must_use]
    pub const fn registration_id(&self) -> u8 {
        self.registration_id
    }

    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.registered != 0
    }

    pub fn register(&mut self, id: u8) {
        self.registration_id = id;
        self.registered = 1;
        self.seal();
    }

    pub fn deregister(&mut self) {
        self.registration_id = 0;
        self.registered = 0;
        self.seal();
    }

    #[must_use]
    pub const fn state_of_charge(&self) -> u8 {
        self.state_of_charge
    }

    #[must_use]
    pub const fn state_of_health(&self) -> u8 {
        self.state_of_health
    }

    #[must_use]
    pub const fn watchdog_resets(&self) -> u16 {
        self.watchdog_resets
    }

    fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    #[allow(clippy::cast_lossless)]
    const fn compute_checksum(&self) -> u16 {
        let bytes = [
            self.recovery,
            self.current,
            self.target,
            self.max,
            self.registration_id,
            self.registered,
            self.state_of_charge,
            self.state_of_health,
        ];
        let mut sum: u16 = 0x5A5A;
        let mut index = 0;
        while index < bytes.len() {
            sum = sum.rotate_left(3) ^ bytes[index] as u16;
            index += 1;
        }
        sum ^ self.watchdog_resets
    }
}

/// Runs one bounded hardware step under the short watchdog leash.
///
/// The tag is written before the leash is shortened and cleared only after the
/// long leash is restored, so a reset inside `step` always finds the tag.
pub fn guarded_step<W, R>(
    durable: &mut DurableState,
    watchdog: &mut W,
    tag: RecoveryTag,
    step: impl FnOnce() -> R,
) -> R
where
    W: Watchdog,
{
    durable.set_recovery_tag(tag);
    watchdog.set_leash(WatchdogLeash::Short);
    let result = step();
    watchdog.set_leash(WatchdogLeash::Long);
    durable.set_recovery_tag(RecoveryTag::Normal);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_record_is_valid() {
        let state = DurableState::cold();
        assert!(state.is_valid());
        assert_eq!(state.current(), ModuleState::Init);
        assert_eq!(state.target(), ModuleState::Off);
        assert_eq!(state.max(), ModuleState::Off);
        assert!(!state.is_registered());
        assert_eq!(state.recovery_tag(), RecoveryTag::Normal);
    }

    #[test]
    fn watchdog_reset_preserves_record() {
        let mut state = DurableState::cold();
        state.register(7);
        state.set_current(ModuleState::Standby);
        state.set_target(ModuleState::On);
        state.set_recovery_tag(RecoveryTag::SwitchOn);

        let (resumed, path) = DurableState::resume(state, ResetCause::Watchdog);
        assert_eq!(path, BootPath::Resume(RecoveryTag::SwitchOn));
        assert_eq!(resumed.registration_id(), 7);
        assert_eq!(resumed.target(), ModuleState::On);
        assert_eq!(resumed.watchdog_resets(), 1);
        assert!(resumed.is_valid());
    }

    #[test]
    fn power_on_reset_discards_record() {
        let mut state = DurableState::cold();
        state.register(7);

        for cause in [ResetCause::PowerOn, ResetCause::External, ResetCause::BrownOut] {
            let (fresh, path) = DurableState::resume(state, cause);
            assert_eq!(path, BootPath::ColdStart);
            assert_eq!(fresh, DurableState::cold());
        }
    }

    #[test]
    fn corrupted_record_cold_starts_even_after_watchdog() {
        let mut state = DurableState::cold();
        state.register(3);
        state.checksum ^= 0x0100;

        let (fresh, path) = DurableState::resume(state, ResetCause::Watchdog);
        assert_eq!(path, BootPath::ColdStart);
        assert!(!fresh.is_registered());
    }

    #[test]
    fn guarded_step_clears_tag_and_restores_long_leash() {
        let mut durable = DurableState::cold();
        let mut watchdog = NoopWatchdog::new();

        let seen = guarded_step(&mut durable, &mut watchdog, RecoveryTag::RelayOff, || 42);

        assert_eq!(seen, 42);
        assert_eq!(durable.recovery_tag(), RecoveryTag::Normal);
        assert_eq!(watchdog.leash(), WatchdogLeash::Long);
        assert_eq!(watchdog.short_arms(), 1);
    }
}
