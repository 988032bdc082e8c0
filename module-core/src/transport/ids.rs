//! Message type identifiers and the 29-bit frame id layout.
//!
//! The message type occupies bits 18..29 of the extended id and the sender's
//! registration id the low bits. The pack controller's types all live in the
//! `0x5xx` block, which is also what the receive filter admits.

use core::fmt;

/// Receive filter: accept types matching `FILTER_TYPE` under `FILTER_MASK`.
pub const FILTER_TYPE: u16 = 0x500;
pub const FILTER_MASK: u16 = 0x700;
const TYPE_MASK: u16 = 0x7ff;
const TYPE_SHIFT: u32 = 18;

/// Messages this node sends to the pack controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutboundKind {
    Announcement,
    HardwareDetail,
    Status1,
    Status2,
    Status3,
    CellDetail,
    RequestTime,
    CellCommStat1,
    CellCommStat2,
}

impl OutboundKind {
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            OutboundKind::Announcement => 0x500,
            OutboundKind::HardwareDetail => 0x501,
            OutboundKind::Status1 => 0x502,
            OutboundKind::Status2 => 0x503,
            OutboundKind::Status3 => 0x504,
            OutboundKind::CellDetail => 0x505,
            OutboundKind::RequestTime => 0x506,
            OutboundKind::CellCommStat1 => 0x507,
            OutboundKind::CellCommStat2 => 0x508,
        }
    }

    #[must_use]
    pub const fn from_raw(value: u16) -> Option<Self> {
        Some(match value {
            0x500 => OutboundKind::Announcement,
            0x501 => OutboundKind::HardwareDetail,
            0x502 => OutboundKind::Status1,
            0x503 => OutboundKind::Status2,
            0x504 => OutboundKind::Status3,
            0x505 => OutboundKind::CellDetail,
            0x506 => OutboundKind::RequestTime,
            0x507 => OutboundKind::CellCommStat1,
            0x508 => OutboundKind::CellCommStat2,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            OutboundKind::Announcement => "announcement",
            OutboundKind::HardwareDetail => "hardware-detail",
            OutboundKind::Status1 => "status1",
            OutboundKind::Status2 => "status2",
            OutboundKind::Status3 => "status3",
            OutboundKind::CellDetail => "cell-detail",
            OutboundKind::RequestTime => "request-time",
            OutboundKind::CellCommStat1 => "cell-comm-stat1",
            OutboundKind::CellCommStat2 => "cell-comm-stat2",
        }
    }
}

impl fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:03x})", self.label(), self.to_raw())
    }
}

/// Messages the pack controller sends to modules.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InboundKind {
    Registration,
    HardwareRequest,
    StatusRequest,
    StateChange,
    CellDetailRequest,
    SetTime,
    MaxState,
    Deregister,
    AnnounceRequest,
    AllDeregister,
    AllIsolate,
}

impl InboundKind {
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            InboundKind::Registration => 0x510,
            InboundKind::HardwareRequest => 0x511,
            InboundKind::StatusRequest => 0x512,
            InboundKind::StateChange => 0x514,
            InboundKind::CellDetailRequest => 0x515,
            InboundKind::SetTime => 0x516,
            InboundKind::MaxState => 0x517,
            InboundKind::Deregister => 0x518,
            InboundKind::AnnounceRequest => 0x51d,
            InboundKind::AllDeregister => 0x51e,
            InboundKind::AllIsolate => 0x51f,
        }
    }

    #[must_use]
    pub const fn from_raw(value: u16) -> Option<Self> {
        Some(match value {
            0x510 => InboundKind::Registration,
            0x511 => InboundKind::HardwareRequest,
            0x512 => InboundKind::StatusRequest,
            0x514 => InboundKind::StateChange,
            0x515 => InboundKind::CellDetailRequest,
            0x516 => InboundKind::SetTime,
            0x517 => InboundKind::MaxState,
            0x518 => InboundKind::Deregister,
            0x51d => InboundKind::AnnounceRequest,
            0x51e => InboundKind::AllDeregister,
            0x51f => InboundKind::AllIsolate,
            _ => return None,
        })
    }

    /// Messages addressed to every module regardless of the id in the payload.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        matches!(
            self,
            InboundKind::MaxState
                | InboundKind::AllDeregister
                | InboundKind::AllIsolate
                | InboundKind::SetTime
                | InboundKind::AnnounceRequest
        )
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            InboundKind::Registration => "registration",
            InboundKind::HardwareRequest => "hardware-request",
            InboundKind::StatusRequest => "status-request",
            InboundKind::StateChange => "state-change",
            InboundKind::CellDetailRequest => "cell-detail-request",
            InboundKind::SetTime => "set-time",
            InboundKind::MaxState => "max-state",
            InboundKind::Deregister => "deregister",
            InboundKind::AnnounceRequest => "announce-request",
            InboundKind::AllDeregister => "all-deregister",
            InboundKind::AllIsolate => "all-isolate",
        }
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:03x})", self.label(), self.to_raw())
    }
}

/// Builds the extended id for a frame of `message_type` sent by `registration_id`.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn encode_id(message_type: u16, registration_id: u8) -> u32 {
    (registration_id as u32) | (((message_type & TYPE_MASK) as u32) << TYPE_SHIFT)
}

/// Recovers the message type from an extended id, working from the
/// controller's two high identifier register bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn decode_type(id: u32) -> u16 {
    let idt1 = ((id >> 21) & 0xff) as u16;
    let idt2 = ((id >> 13) & 0xff) as u16;
    ((idt1 << 3) | (idt2 >> 5)) & TYPE_MASK
}

/// Whether the hardware receive filter admits `message_type`.
#[must_use]
pub const fn filter_accepts(message_type: u16) -> bool {
    message_type & FILTER_MASK == FILTER_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_survives_register_byte_extraction() {
        let id = encode_id(InboundKind::StateChange.to_raw(), 0x2a);
        assert_eq!(id & 0xff, 0x2a);
        assert_eq!(decode_type(id), 0x514);
        assert_eq!(decode_type(encode_id(0x7ff, 0xff)), 0x7ff);
    }

    #[test]
    fn filter_admits_only_the_pack_block() {
        assert!(filter_accepts(0x51f));
        assert!(filter_accepts(0x500));
        assert!(!filter_accepts(0x610));
        assert!(!filter_accepts(0x410));
    }

    #[test]
    fn unknown_inbound_types_are_rejected() {
        assert_eq!(InboundKind::from_raw(0x513), None);
        assert_eq!(InboundKind::from_raw(0x51d), Some(InboundKind::AnnounceRequest));
        assert_eq!(OutboundKind::from_raw(0x509), None);
        assert_eq!(
            OutboundKind::from_raw(OutboundKind::CellCommStat1.to_raw()),
            Some(OutboundKind::CellCommStat1)
        );
    }
}
