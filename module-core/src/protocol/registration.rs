//! Inbound command decoding and the announcement backoff.
//!
//! Decoding is pure: it validates lengths, identity qualifiers, and addressing
//! and yields a [`Command`] for the node to apply. Anything malformed or not
//! meant for this module decodes to nothing.

use crate::transport::InboundKind;

use super::payload::{MANUFACTURER_ID, PART_ID};

/// Cell detail index that selects every cell.
pub const CELL_DETAIL_ALL: u8 = 0xff;

/// Who this module is, as far as addressing is concerned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Address {
    pub unique_id: u32,
    /// Assigned id while registered.
    pub registration: Option<u8>,
}

/// A validated request from the pack controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Register { id: u8 },
    StatusRequest,
    CellDetail { index: u8 },
    /// Raw requested state, low nibble only.
    SetTarget(u8),
    HardwareDetail,
    Deregister,
    SetMax(u8),
    DeregisterAll,
    Isolate,
    SetTime(u64),
    AnnounceRequest,
}

/// Result of decoding one inbound message.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Decoded {
    /// The message counts as contact from the pack controller.
    pub contact: bool,
    pub command: Option<Command>,
}

#[must_use]
pub fn decode(kind: InboundKind, payload: &[u8], address: Address) -> Decoded {
    let command = match kind {
        InboundKind::Registration => decode_registration(payload, address.unique_id),
        kind if kind.is_broadcast() => decode_broadcast(kind, payload),
        kind => decode_addressed(kind, payload, address.registration),
    };
    // A registration only counts when it names this module.
    let contact = match kind {
        InboundKind::Registration => command.is_some(),
        _ => !payload.is_empty(),
    };
    Decoded { contact, command }
}

fn decode_registration(payload: &[u8], unique_id: u32) -> Option<Command> {
    let &[id, _, manufacturer, part, a, b, c, d] = payload else {
        return None;
    };
    let matches = manufacturer == MANUFACTURER_ID
        && part == PART_ID
        && u32::from_le_bytes([a, b, c, d]) == unique_id;
    matches.then_some(Command::Register { id })
}

fn decode_broadcast(kind: InboundKind, payload: &[u8]) -> Option<Command> {
    match kind {
        InboundKind::MaxState => payload.get(1).map(|state| Command::SetMax(state & 0x0f)),
        InboundKind::AllDeregister if !payload.is_empty() => Some(Command::DeregisterAll),
        InboundKind::AllIsolate if !payload.is_empty() => Some(Command::Isolate),
        InboundKind::SetTime => {
            let seconds: [u8; 8] = payload.try_into().ok()?;
            Some(Command::SetTime(u64::from_le_bytes(seconds)))
        }
        InboundKind::AnnounceRequest if !payload.is_empty() => Some(Command::AnnounceRequest),
        _ => None,
    }
}

fn decode_addressed(kind: InboundKind, payload: &[u8], registration: Option<u8>) -> Option<Command> {
    let (&target, _) = payload.split_first()?;
    if registration != Some(target) {
        return None;
    }
    match (kind, payload.len()) {
        (InboundKind::StatusRequest, 1) => Some(Command::StatusRequest),
        (InboundKind::CellDetailRequest, 3) => Some(Command::CellDetail { index: payload[1] }),
        (InboundKind::StateChange, 2) => Some(Command::SetTarget(payload[1] & 0x0f)),
        (InboundKind::HardwareRequest, _) => Some(Command::HardwareDetail),
        (InboundKind::Deregister, _) => Some(Command::Deregister),
        _ => None,
    }
}

/// Announcement scheduling for an unregistered module.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Announcer {
    pending: bool,
    delay: u8,
    send: bool,
}

impl Announcer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: false,
            delay: 0,
            send: false,
        }
    }

    /// Schedules an announcement after a per-module backoff so modules
    /// answering the same request do not collide. Returns the delay in ticks.
    pub fn schedule(&mut self, unique_id: u32, registered: bool) -> Option<u8> {
        if registered || self.pending {
            return None;
        }
        let delay = (unique_id.to_le_bytes()[0] / 10).max(1);
        self.delay = delay;
        self.pending = true;
        Some(delay)
    }

    /// Counts the backoff down once per main-loop pass.
    pub fn on_service(&mut self) {
        if !self.pending {
            return;
        }
        self.delay = self.delay.saturating_sub(1);
        if self.delay == 0 {
            self.send = true;
            self.pending = false;
        }
    }

    pub fn cancel(&mut self) {
        self.pending = false;
        self.delay = 0;
    }

    /// Requests an announcement at the next opportunity.
    pub fn raise(&mut self) {
        self.send = true;
    }

    #[must_use]
    pub const fn send_pending(&self) -> bool {
        self.send
    }

    #[must_use]
    pub const fn backoff_pending(&self) -> bool {
        self.pending
    }

    /// Marks the announcement as accepted by the transport.
    pub fn sent(&mut self) {
        self.send = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIQUE_ID: u32 = 0xdead_be2d;

    fn unregistered() -> Address {
        Address {
            unique_id: UNIQUE_ID,
            registration: None,
        }
    }

    fn registered(id: u8) -> Address {
        Address {
            unique_id: UNIQUE_ID,
            registration: Some(id),
        }
    }

    #[test]
    fn registration_requires_matching_identity() {
        let mut payload = [7, 0, MANUFACTURER_ID, PART_ID, 0, 0, 0, 0];
        payload[4..].copy_from_slice(&UNIQUE_ID.to_le_bytes());
        let decoded = decode(InboundKind::Registration, &payload, unregistered());
        assert_eq!(decoded.command, Some(Command::Register { id: 7 }));
        assert!(decoded.contact);

        payload[3] = 0x04;
        let decoded = decode(InboundKind::Registration, &payload, unregistered());
        assert_eq!(decoded.command, None);
        assert!(!decoded.contact);

        let decoded = decode(InboundKind::Registration, &payload[..7], unregistered());
        assert_eq!(decoded.command, None);
    }

    #[test]
    fn addressed_commands_need_matching_registration() {
        let decoded = decode(InboundKind::StateChange, &[5, 3], registered(5));
        assert_eq!(decoded.command, Some(Command::SetTarget(3)));

        let decoded = decode(InboundKind::StateChange, &[6, 3], registered(5));
        assert_eq!(decoded.command, None);
        assert!(decoded.contact);

        let decoded = decode(InboundKind::StateChange, &[0, 3], unregistered());
        assert_eq!(decoded.command, None);
    }

    #[test]
    fn lengths_are_enforced() {
        assert_eq!(
            decode(InboundKind::StatusRequest, &[5, 0], registered(5)).command,
            None
        );
        assert_eq!(
            decode(InboundKind::CellDetailRequest, &[5, 2, 0], registered(5)).command,
            Some(Command::CellDetail { index: 2 })
        );
        assert_eq!(
            decode(InboundKind::SetTime, &[1, 2, 3], unregistered()).command,
            None
        );
    }

    #[test]
    fn broadcasts_ignore_the_address_byte() {
        assert_eq!(
            decode(InboundKind::MaxState, &[0x33, 0xf3], unregistered()).command,
            Some(Command::SetMax(3))
        );
        assert_eq!(
            decode(InboundKind::AllIsolate, &[0x99], registered(5)).command,
            Some(Command::Isolate)
        );
        let seconds = 1_700_000_000u64.to_le_bytes();
        assert_eq!(
            decode(InboundKind::SetTime, &seconds, registered(5)).command,
            Some(Command::SetTime(1_700_000_000))
        );
    }

    #[test]
    fn registration_for_another_module_is_not_contact() {
        let mut payload = [7, 0, MANUFACTURER_ID, PART_ID, 0, 0, 0, 0];
        payload[4..].copy_from_slice(&(UNIQUE_ID ^ 1).to_le_bytes());
        let decoded = decode(InboundKind::Registration, &payload, registered(5));
        assert_eq!(decoded, Decoded::default());
    }

    #[test]
    fn empty_messages_are_not_contact() {
        let decoded = decode(InboundKind::AllIsolate, &[], registered(5));
        assert_eq!(decoded, Decoded::default());
    }

    #[test]
    fn announcement_backoff_uses_low_id_byte() {
        let mut announcer = Announcer::new();
        // 0x2d = 45 -> 4 ticks.
        assert_eq!(announcer.schedule(UNIQUE_ID, false), Some(4));
        assert_eq!(announcer.schedule(UNIQUE_ID, false), None);

        for _ in 0..3 {
            announcer.on_service();
            assert!(!announcer.send_pending());
        }
        announcer.on_service();
        assert!(announcer.send_pending());
        assert!(!announcer.backoff_pending());

        announcer.sent();
        assert!(!announcer.send_pending());
    }

    #[test]
    fn small_ids_still_wait_one_tick() {
        let mut announcer = Announcer::new();
        assert_eq!(announcer.schedule(0x0000_0105, false), Some(1));
        assert_eq!(announcer.schedule(0x0000_0105, true), None);
    }
}
