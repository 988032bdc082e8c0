//! Helpers shared by the node scenarios.

#![allow(dead_code)]

use module_core::collaborators::ConfigSnapshot;
use module_core::node::ModuleController;
use module_core::node::sim::{SimBoard, inbound};
use module_core::telemetry::TelemetryEventKind;
use module_core::transport::sim::SimulatedController;
use module_core::transport::{CanFrame, CanTransport, ControllerEvent, InboundKind};

pub const UNIQUE_ID: u32 = 0x0102_0364;
pub const REGISTRATION_ID: u8 = 9;

pub type Node<'a> = ModuleController<'a, SimBoard>;
pub type Transport = CanTransport<SimulatedController>;

pub fn config() -> ConfigSnapshot {
    ConfigSnapshot {
        unique_id: UNIQUE_ID,
        expected_cells: 4,
        max_charge_current: 0,
        max_discharge_current: 0,
        mismatch_threshold: 3,
    }
}

pub fn transport() -> Transport {
    CanTransport::new(SimulatedController::new())
}

/// Registration for this module carrying `id`.
pub fn registration(id: u8) -> CanFrame {
    registration_for(UNIQUE_ID, id)
}

pub fn registration_for(unique_id: u32, id: u8) -> CanFrame {
    let mut payload = [id, 0, 0x02, 0x03, 0, 0, 0, 0];
    payload[4..].copy_from_slice(&unique_id.to_le_bytes());
    inbound(InboundKind::Registration, 0, &payload).expect("registration frame")
}

/// Message addressed by registration id, followed by `rest`.
pub fn addressed(kind: InboundKind, id: u8, rest: &[u8]) -> CanFrame {
    let mut payload = heapless::Vec::<u8, 8>::new();
    payload.push(id).expect("room for id");
    payload.extend_from_slice(rest).expect("payload fits");
    inbound(kind, 0, &payload).expect("addressed frame")
}

pub fn broadcast(kind: InboundKind, payload: &[u8]) -> CanFrame {
    inbound(kind, 0, payload).expect("broadcast frame")
}

/// One scheduler tick followed by a main-loop pass on a healthy bus.
pub fn pass(node: &mut Node<'_>, transport: &Transport) {
    node.on_timer_tick();
    node.service();
    if transport.is_busy() {
        transport.on_event(ControllerEvent::TxComplete);
    }
}

pub fn passes(node: &mut Node<'_>, transport: &Transport, count: usize) {
    for _ in 0..count {
        pass(node, transport);
    }
}

/// Message types transmitted since the last drain, oldest first.
pub fn drain(transport: &Transport) -> Vec<u16> {
    transport.with_controller(|controller| {
        let mut sent = Vec::new();
        while let Some(frame) = controller.pop_transmitted() {
            sent.push(frame.message_type());
        }
        sent
    })
}

pub fn events(node: &Node<'_>) -> Vec<TelemetryEventKind> {
    node.telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect()
}
