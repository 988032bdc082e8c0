//! Reliable single-slot messaging over the shared CAN bus.
//!
//! At most one outbound frame is in flight. Completion is normally reported
//! by the controller interrupt ([`CanTransport::on_event`]); a per-tick poll
//! ([`CanTransport::poll_tx`]) catches completions the interrupt missed and
//! times out a stuck mailbox. A bus-off event blocks sends for a recovery
//! delay while the controller rejoins the bus.
//!
//! Interrupt and main-loop contexts share the transport through `&self`; every
//! mutation happens inside a short critical section.

pub mod ids;
pub mod sim;

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;

pub use ids::{InboundKind, OutboundKind};

/// Largest payload a frame carries.
pub const MAX_PAYLOAD: usize = 8;
/// Retransmissions attempted after a transmit error before the message is dropped.
pub const MAX_RETRIES: u8 = 20;
/// Ticks an accepted frame may stay in the mailbox before the poll aborts it.
pub const TX_BUSY_TICKS: u8 = 2;
/// Ticks sends stay blocked after a bus-off.
pub const BUS_OFF_RECOVERY_TICKS: u8 = 10;
/// Error counter level above which the controller is error-passive.
pub const ERROR_PASSIVE_LIMIT: u8 = 127;

/// One extended-id data frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CanFrame {
    id: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD],
}

impl CanFrame {
    /// Builds a frame, or `None` when the payload exceeds eight bytes.
    #[must_use]
    pub fn new(id: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        let mut data = [0; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            len: u8::try_from(payload.len()).ok()?,
            data,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    #[must_use]
    pub const fn message_type(&self) -> u16 {
        ids::decode_type(self.id)
    }
}

/// Transmit mailbox state read by the poll fallback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxStatus {
    Pending,
    Complete,
    Failed,
}

/// Controller error counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorCounters {
    pub transmit: u8,
    pub receive: u8,
}

impl ErrorCounters {
    #[must_use]
    pub const fn error_passive(&self) -> bool {
        self.transmit > ERROR_PASSIVE_LIMIT || self.receive > ERROR_PASSIVE_LIMIT
    }
}

/// Identity of one accepted send. Retransmissions reuse it, so a
/// completion can be matched to the frame it belongs to.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TxSequence(u16);

impl TxSequence {
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn to_raw(self) -> u16 {
        self.0
    }

    #[must_use]
    const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Register-level bus controller.
pub trait CanController {
    /// Loads `frame` into the transmit mailbox and requests transmission.
    fn start_transmit(&mut self, frame: &CanFrame, sequence: TxSequence);

    fn transmit_status(&mut self) -> TxStatus;

    fn abort_transmit(&mut self);

    fn error_counters(&self) -> ErrorCounters;

    fn is_enabled(&self) -> bool;

    /// Re-enables the controller, rejoining the bus.
    fn enable(&mut self);

    fn receive_armed(&self) -> bool;

    fn arm_receive(&mut self);
}

/// Interrupt-level controller notifications.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerEvent {
    TxComplete,
    TxError,
    BusOff,
}

/// Reasons [`CanTransport::send`] refuses a frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendError {
    /// A message is still in flight.
    Busy,
    /// The bus is recovering from bus-off.
    Recovering,
    PayloadTooLong,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SendError::Busy => "transmit mailbox busy",
            SendError::Recovering => "recovering from bus-off",
            SendError::PayloadTooLong => "payload longer than 8 bytes",
        })
    }
}

/// Receiver for decoded inbound messages.
pub trait MessageHandler {
    fn on_message(&mut self, kind: InboundKind, payload: &[u8]);
}

/// Sink for outbound messages, addressed by the caller's registration id.
pub trait Outbound {
    /// # Errors
    ///
    /// Returns [`SendError`] when the frame was not accepted; nothing was sent.
    fn send(&mut self, kind: OutboundKind, payload: &[u8]) -> Result<(), SendError>;
}

/// Bus health counters exposed for diagnostics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BusDiagnostics {
    pub tx_timeouts: u16,
    pub tx_errors: u16,
    pub tx_ok_polled: u16,
    pub bus_off_events: u16,
    pub error_passive_events: u16,
    /// Completions that arrived for a frame no longer in flight.
    pub stale_events: u16,
    pub counters: ErrorCounters,
    pub recovery_delay: u8,
    pub in_flight: bool,
}

impl fmt::Display for BusDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx-timeouts={} tx-errors={} tx-ok-polled={} bus-off={} error-passive={} stale={} tec={} rec={} recovery={} busy={}",
            self.tx_timeouts,
            self.tx_errors,
            self.tx_ok_polled,
            self.bus_off_events,
            self.error_passive_events,
            self.stale_events,
            self.counters.transmit,
            self.counters.receive,
            self.recovery_delay,
            self.in_flight,
        )
    }
}

#[derive(Copy, Clone, Debug)]
struct InFlight {
    frame: CanFrame,
    sequence: TxSequence,
    attempts: u8,
    busy_ticks: u8,
}

struct TransportState<C> {
    controller: C,
    in_flight: Option<InFlight>,
    next_sequence: TxSequence,
    recovery_delay: u8,
    tx_timeouts: u16,
    tx_errors: u16,
    tx_ok_polled: u16,
    bus_off_events: u16,
    error_passive_events: u16,
    stale_events: u16,
}

/// Single-outstanding-message transport.
pub struct CanTransport<C> {
    state: Mutex<RefCell<TransportState<C>>>,
}

impl<C> CanTransport<C>
where
    C: CanController,
{
    #[must_use]
    pub const fn new(controller: C) -> Self {
        Self {
            state: Mutex::new(RefCell::new(TransportState {
                controller,
                in_flight: None,
                next_sequence: TxSequence(0),
                recovery_delay: 0,
                tx_timeouts: 0,
                tx_errors: 0,
                tx_ok_polled: 0,
                bus_off_events: 0,
                error_passive_events: 0,
                stale_events: 0,
            })),
        }
    }

    /// Starts transmitting a frame of `kind` from `registration_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Busy`] while another frame is in flight,
    /// [`SendError::Recovering`] during the bus-off recovery delay, and
    /// [`SendError::PayloadTooLong`] for payloads over eight bytes.
    pub fn send(
        &self,
        kind: OutboundKind,
        registration_id: u8,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let frame = CanFrame::new(ids::encode_id(kind.to_raw(), registration_id), payload)
            .ok_or(SendError::PayloadTooLong)?;
        self.with_state(|state| {
            if state.in_flight.is_some() {
                return Err(SendError::Busy);
            }
            if state.recovery_delay > 0 {
                return Err(SendError::Recovering);
            }
            let sequence = state.next_sequence;
            state.next_sequence = sequence.next();
            state.in_flight = Some(InFlight {
                frame,
                sequence,
                attempts: 0,
                busy_ticks: TX_BUSY_TICKS,
            });
            state.controller.start_transmit(&frame, sequence);
            Ok(())
        })
    }

    /// Handles a controller interrupt for whatever frame is in the mailbox.
    pub fn on_event(&self, event: ControllerEvent) {
        self.with_state(|state| Self::apply_event(state, event));
    }

    /// Handles a completion reported for the send identified by `sequence`.
    /// Transmit outcomes for a frame that is no longer in flight are
    /// ignored; bus-off always applies.
    pub fn on_event_for(&self, sequence: TxSequence, event: ControllerEvent) {
        self.with_state(|state| {
            let current = state.in_flight.map(|in_flight| in_flight.sequence);
            if event == ControllerEvent::BusOff || current == Some(sequence) {
                Self::apply_event(state, event);
            } else {
                state.stale_events = state.stale_events.saturating_add(1);
            }
        });
    }

    fn apply_event(state: &mut TransportState<C>, event: ControllerEvent) {
        match event {
            ControllerEvent::TxComplete => state.in_flight = None,
            ControllerEvent::TxError => {
                let Some(in_flight) = state.in_flight.as_mut() else {
                    return;
                };
                if in_flight.attempts < MAX_RETRIES {
                    in_flight.attempts += 1;
                    let (frame, sequence) = (in_flight.frame, in_flight.sequence);
                    state.controller.start_transmit(&frame, sequence);
                } else {
                    state.in_flight = None;
                    state.tx_errors = state.tx_errors.saturating_add(1);
                }
            }
            ControllerEvent::BusOff => {
                state.bus_off_events = state.bus_off_events.saturating_add(1);
                state.in_flight = None;
                state.controller.enable();
                state.recovery_delay = BUS_OFF_RECOVERY_TICKS;
            }
        }
    }

    /// Per-tick completion check for a frame the interrupt has not resolved.
    pub fn poll_tx(&self) {
        self.with_state(|state| {
            let Some(mut in_flight) = state.in_flight else {
                return;
            };
            match state.controller.transmit_status() {
                TxStatus::Complete => {
                    state.in_flight = None;
                    state.tx_ok_polled = state.tx_ok_polled.saturating_add(1);
                }
                TxStatus::Failed => {
                    state.in_flight = None;
                    state.tx_errors = state.tx_errors.saturating_add(1);
                }
                TxStatus::Pending => {
                    in_flight.busy_ticks = in_flight.busy_ticks.saturating_sub(1);
                    if in_flight.busy_ticks == 0 {
                        state.controller.abort_transmit();
                        state.in_flight = None;
                        state.tx_timeouts = state.tx_timeouts.saturating_add(1);
                    } else {
                        state.in_flight = Some(in_flight);
                    }
                }
            }
        });
    }

    /// Per-tick bus health maintenance.
    pub fn check_health(&self) {
        self.with_state(|state| {
            state.recovery_delay = state.recovery_delay.saturating_sub(1);
            if state.controller.error_counters().error_passive() {
                state.error_passive_events = state.error_passive_events.saturating_add(1);
            }
            if !state.controller.is_enabled() {
                state.controller.enable();
            }
            if !state.controller.receive_armed() {
                state.controller.arm_receive();
            }
        });
    }

    /// Decodes a received frame and hands it to `handler`. Returns the kind
    /// delivered, or `None` when the type was not recognised.
    pub fn receive<H>(&self, frame: &CanFrame, handler: &mut H) -> Option<InboundKind>
    where
        H: MessageHandler + ?Sized,
    {
        let message_type = frame.message_type();
        let kind = if ids::filter_accepts(message_type) {
            InboundKind::from_raw(message_type)
        } else {
            None
        };
        self.with_state(|state| state.controller.arm_receive());
        let kind = kind?;
        handler.on_message(kind, frame.payload());
        Some(kind)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.with_state(|state| state.in_flight.is_some())
    }

    #[must_use]
    pub fn diagnostics(&self) -> BusDiagnostics {
        self.with_state(|state| BusDiagnostics {
            tx_timeouts: state.tx_timeouts,
            tx_errors: state.tx_errors,
            tx_ok_polled: state.tx_ok_polled,
            bus_off_events: state.bus_off_events,
            error_passive_events: state.error_passive_events,
            stale_events: state.stale_events,
            counters: state.controller.error_counters(),
            recovery_delay: state.recovery_delay,
            in_flight: state.in_flight.is_some(),
        })
    }

    /// Runs `f` against the controller inside the transport's critical section.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        self.with_state(|state| f(&mut state.controller))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TransportState<C>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }
}

/// [`Outbound`] view of a transport for one registration id.
pub struct AddressedSender<'a, C> {
    transport: &'a CanTransport<C>,
    registration_id: u8,
}

impl<'a, C> AddressedSender<'a, C> {
    #[must_use]
    pub const fn new(transport: &'a CanTransport<C>, registration_id: u8) -> Self {
        Self {
            transport,
            registration_id,
        }
    }
}

impl<C> Outbound for AddressedSender<'_, C>
where
    C: CanController,
{
    fn send(&mut self, kind: OutboundKind, payload: &[u8]) -> Result<(), SendError> {
        self.transport.send(kind, self.registration_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::sim::SimulatedController;
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Option<(InboundKind, usize)>,
    }

    impl MessageHandler for Recorder {
        fn on_message(&mut self, kind: InboundKind, payload: &[u8]) {
            self.seen = Some((kind, payload.len()));
        }
    }

    fn transport() -> CanTransport<SimulatedController> {
        CanTransport::new(SimulatedController::new())
    }

    #[test]
    fn second_send_is_busy_until_completion() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 7, &[1, 2, 3])
            .expect("first send accepted");
        assert_eq!(
            transport.send(OutboundKind::Status2, 7, &[]),
            Err(SendError::Busy)
        );

        transport.on_event(ControllerEvent::TxComplete);
        transport
            .send(OutboundKind::Status2, 7, &[])
            .expect("slot free after completion");
        assert_eq!(transport.with_controller(|c| c.transmitted().len()), 2);
    }

    #[test]
    fn transmit_errors_retry_then_give_up() {
        let transport = transport();
        transport
            .send(OutboundKind::Announcement, 0, &[0; 8])
            .expect("send accepted");

        for _ in 0..MAX_RETRIES {
            transport.on_event(ControllerEvent::TxError);
            assert!(transport.is_busy());
        }
        transport.on_event(ControllerEvent::TxError);
        assert!(!transport.is_busy());

        let diagnostics = transport.diagnostics();
        assert_eq!(diagnostics.tx_errors, 1);
        assert_eq!(
            transport.with_controller(|c| c.transmitted().len()),
            1 + usize::from(MAX_RETRIES)
        );
    }

    #[test]
    fn bus_off_blocks_sends_for_recovery_delay() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("send accepted");
        transport.on_event(ControllerEvent::BusOff);

        assert!(!transport.is_busy());
        assert_eq!(
            transport.send(OutboundKind::Status1, 3, &[]),
            Err(SendError::Recovering)
        );
        for _ in 0..BUS_OFF_RECOVERY_TICKS {
            transport.check_health();
        }
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("recovered");
        assert_eq!(transport.diagnostics().bus_off_events, 1);
    }

    #[test]
    fn poll_times_out_a_stuck_mailbox() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("send accepted");

        transport.poll_tx();
        assert!(transport.is_busy());
        transport.poll_tx();
        assert!(!transport.is_busy());

        let diagnostics = transport.diagnostics();
        assert_eq!(diagnostics.tx_timeouts, 1);
        assert_eq!(transport.with_controller(|c| c.aborts()), 1);
    }

    #[test]
    fn poll_observes_missed_completion() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("send accepted");
        transport.with_controller(|c| c.set_tx_status(TxStatus::Complete));
        transport.poll_tx();
        assert!(!transport.is_busy());
        assert_eq!(transport.diagnostics().tx_ok_polled, 1);
    }

    #[test]
    fn late_completion_does_not_release_the_next_frame() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("send accepted");
        let timed_out = transport
            .with_controller(|c| c.last_sequence())
            .expect("first sequence");
        transport.poll_tx();
        transport.poll_tx();
        assert!(!transport.is_busy());

        transport
            .send(OutboundKind::Status2, 3, &[])
            .expect("slot free after timeout");
        let current = transport
            .with_controller(|c| c.last_sequence())
            .expect("second sequence");
        assert_ne!(timed_out, current);

        transport.on_event_for(timed_out, ControllerEvent::TxComplete);
        assert!(transport.is_busy());
        assert_eq!(transport.diagnostics().stale_events, 1);

        transport.on_event_for(timed_out, ControllerEvent::TxError);
        assert_eq!(transport.with_controller(|c| c.transmit_count()), 2);

        transport.on_event_for(current, ControllerEvent::TxComplete);
        assert!(!transport.is_busy());
        assert_eq!(transport.diagnostics().stale_events, 2);
    }

    #[test]
    fn retransmissions_keep_their_sequence() {
        let transport = transport();
        transport
            .send(OutboundKind::Status1, 3, &[])
            .expect("send accepted");
        let sequence = transport.with_controller(|c| c.last_sequence());

        transport.on_event(ControllerEvent::TxError);
        assert_eq!(transport.with_controller(|c| c.last_sequence()), sequence);
        assert_eq!(transport.with_controller(|c| c.transmit_count()), 2);
    }

    #[test]
    fn health_check_counts_error_passive_and_rearms() {
        let transport = transport();
        transport.with_controller(|c| {
            c.set_error_counters(ErrorCounters {
                transmit: 128,
                receive: 0,
            });
            c.disable();
            c.disarm_receive();
        });
        transport.check_health();

        assert_eq!(transport.diagnostics().error_passive_events, 1);
        assert!(transport.with_controller(|c| c.is_enabled() && c.receive_armed()));
    }

    #[test]
    fn receive_dispatches_known_types_only() {
        let transport = transport();
        let mut recorder = Recorder::default();

        let frame = CanFrame::new(ids::encode_id(0x512, 1), &[4]).expect("frame");
        assert_eq!(
            transport.receive(&frame, &mut recorder),
            Some(InboundKind::StatusRequest)
        );
        assert_eq!(recorder.seen, Some((InboundKind::StatusRequest, 1)));

        recorder.seen = None;
        let unknown = CanFrame::new(ids::encode_id(0x513, 1), &[4]).expect("frame");
        assert_eq!(transport.receive(&unknown, &mut recorder), None);
        assert!(recorder.seen.is_none());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let transport = transport();
        assert_eq!(
            transport.send(OutboundKind::Status1, 1, &[0; 9]),
            Err(SendError::PayloadTooLong)
        );
        assert!(!transport.is_busy());
    }
}
