//! Node event catalog and the fixed-capacity ring that records it.
//!
//! The core crate does not log. Anything an operator would want to see after
//! the fact is recorded here with the scheduler tick it happened on; the
//! firmware drains new records to defmt and the emulator prints them.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::collaborators::ConfigError;
use crate::durable::RecoveryTag;
use crate::power::ModuleState;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Scheduler ticks since boot.
pub type Tick = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated node events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ColdStart,
    /// Booted from a watchdog reset with the durable record intact.
    Resumed(RecoveryTag),
    ConfigInvalid(ConfigError),
    StateTransition {
        from: ModuleState,
        to: ModuleState,
    },
    Registered(u8),
    Deregistered,
    ContactLost,
    AnnouncementScheduled(u8),
    AnnouncementSent,
    Overcurrent,
    AuxPowerLost,
    /// Cell count mismatches reached the threshold and the chain was power cycled.
    SensorChainReset,
    StorageFailed,
    BusOff,
}

impl TelemetryEventKind {
    const COLD_START_CODE: u16 = 0x0001;
    const RESUMED_BASE: u16 = 0x0010;
    const CONFIG_INVALID_BASE: u16 = 0x0020;
    const TRANSITION_BASE: u16 = 0x0100;
    const REGISTERED_CODE: u16 = 0x0200;
    const DEREGISTERED_CODE: u16 = 0x0201;
    const CONTACT_LOST_CODE: u16 = 0x0202;
    const ANNOUNCEMENT_SCHEDULED_CODE: u16 = 0x0203;
    const ANNOUNCEMENT_SENT_CODE: u16 = 0x0204;
    const OVERCURRENT_CODE: u16 = 0x0300;
    const AUX_POWER_LOST_CODE: u16 = 0x0301;
    const SENSOR_CHAIN_RESET_CODE: u16 = 0x0400;
    const STORAGE_FAILED_CODE: u16 = 0x0401;
    const BUS_OFF_CODE: u16 = 0x0500;

    /// Compact discriminant for log transports. Event data beyond the kind is
    /// folded in only where it fits in the low byte.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn code(self) -> u16 {
        match self {
            TelemetryEventKind::ColdStart => Self::COLD_START_CODE,
            TelemetryEventKind::Resumed(tag) => Self::RESUMED_BASE + tag.to_raw() as u16,
            TelemetryEventKind::ConfigInvalid(error) => {
                Self::CONFIG_INVALID_BASE
                    + match error {
                        ConfigError::UnprogrammedId => 0,
                        ConfigError::NoCellCount => 1,
                    }
            }
            TelemetryEventKind::StateTransition { to, .. } => {
                Self::TRANSITION_BASE + to.to_raw() as u16
            }
            TelemetryEventKind::Registered(_) => Self::REGISTERED_CODE,
            TelemetryEventKind::Deregistered => Self::DEREGISTERED_CODE,
            TelemetryEventKind::ContactLost => Self::CONTACT_LOST_CODE,
            TelemetryEventKind::AnnouncementScheduled(_) => Self::ANNOUNCEMENT_SCHEDULED_CODE,
            TelemetryEventKind::AnnouncementSent => Self::ANNOUNCEMENT_SENT_CODE,
            TelemetryEventKind::Overcurrent => Self::OVERCURRENT_CODE,
            TelemetryEventKind::AuxPowerLost => Self::AUX_POWER_LOST_CODE,
            TelemetryEventKind::SensorChainReset => Self::SENSOR_CHAIN_RESET_CODE,
            TelemetryEventKind::StorageFailed => Self::STORAGE_FAILED_CODE,
            TelemetryEventKind::BusOff => Self::BUS_OFF_CODE,
        }
    }

    /// Returns `true` for events that indicate a fault rather than routine progress.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::ConfigInvalid(_)
                | TelemetryEventKind::ContactLost
                | TelemetryEventKind::Overcurrent
                | TelemetryEventKind::AuxPowerLost
                | TelemetryEventKind::SensorChainReset
                | TelemetryEventKind::StorageFailed
                | TelemetryEventKind::BusOff
        )
    }
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ColdStart => f.write_str("cold-start"),
            TelemetryEventKind::Resumed(tag) => write!(f, "resumed {tag}"),
            TelemetryEventKind::ConfigInvalid(error) => write!(f, "config-invalid ({error})"),
            TelemetryEventKind::StateTransition { from, to } => {
                write!(f, "transition {from} -> {to}")
            }
            TelemetryEventKind::Registered(id) => write!(f, "registered id={id}"),
            TelemetryEventKind::Deregistered => f.write_str("deregistered"),
            TelemetryEventKind::ContactLost => f.write_str("contact-lost"),
            TelemetryEventKind::AnnouncementScheduled(delay) => {
                write!(f, "announcement-scheduled in {delay} ticks")
            }
            TelemetryEventKind::AnnouncementSent => f.write_str("announcement-sent"),
            TelemetryEventKind::Overcurrent => f.write_str("overcurrent"),
            TelemetryEventKind::AuxPowerLost => f.write_str("aux-power-lost"),
            TelemetryEventKind::SensorChainReset => f.write_str("sensor-chain-reset"),
            TelemetryEventKind::StorageFailed => f.write_str("storage-failed"),
            TelemetryEventKind::BusOff => f.write_str("bus-off"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub tick: Tick,
    pub event: TelemetryEventKind,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} t={} {}", self.id, self.tick, self.event)
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event and returns its id.
    pub fn record(&mut self, event: TelemetryEventKind, tick: Tick) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord { id, tick, event });
        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Records with an id at or after `next`, oldest first.
    #[must_use]
    pub fn since(&self, next: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered().filter(move |record| record.id >= next)
    }

    /// Id the next record will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_sequential_ids() {
        let mut recorder = TelemetryRecorder::<4>::new();
        assert_eq!(recorder.record(TelemetryEventKind::ColdStart, 0), 0);
        assert_eq!(recorder.record(TelemetryEventKind::Registered(5), 3), 1);

        let latest = recorder.latest().copied().expect("latest record");
        assert_eq!(latest.event, TelemetryEventKind::Registered(5));
        assert_eq!(latest.tick, 3);
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut recorder = TelemetryRecorder::<2>::new();
        recorder.record(TelemetryEventKind::ColdStart, 0);
        recorder.record(TelemetryEventKind::Overcurrent, 1);
        recorder.record(TelemetryEventKind::BusOff, 2);

        assert_eq!(recorder.len(), 2);
        let events: [TelemetryEventKind; 2] =
            [TelemetryEventKind::Overcurrent, TelemetryEventKind::BusOff];
        assert!(recorder.oldest_first().map(|record| record.event).eq(events));
        assert_eq!(recorder.since(2).count(), 1);
        assert_eq!(recorder.next_id(), 3);
    }

    #[test]
    fn transition_codes_carry_destination() {
        let event = TelemetryEventKind::StateTransition {
            from: ModuleState::Off,
            to: ModuleState::On,
        };
        assert_eq!(event.code(), 0x0103);
        assert!(!event.is_fault());
        assert!(TelemetryEventKind::BusOff.is_fault());
        assert_eq!(
            TelemetryEventKind::Resumed(RecoveryTag::SwitchOn).code(),
            0x0013
        );
    }
}
