mod support;

use module_core::durable::{BootPath, DurableState};
use module_core::frame::CellSample;
use module_core::node::sim::SimBoard;
use module_core::power::ModuleState;
use module_core::telemetry::TelemetryEventKind;
use module_core::transport::InboundKind;
use support::{REGISTRATION_ID, broadcast, config, events, pass, passes, registration, transport};

const CELL: CellSample = CellSample {
    voltage: 0x0347,
    temperature: 0x0150,
};

const EPOCH_SECONDS: u64 = 1_700_000_000;

fn standby(node: &mut support::Node<'_>, transport: &support::Transport) {
    node.boot(BootPath::ColdStart);
    node.cell_link_mut().set_uniform_cells(4, CELL);
    node.receive(&registration(REGISTRATION_ID));
    pass(node, transport);
    assert!(node.request_max(ModuleState::Standby));
    assert!(node.request_target(ModuleState::Standby));
    pass(node, transport);
    assert_eq!(node.durable().current(), ModuleState::Standby);
}

#[test]
fn standby_opens_a_session_and_frames_are_logged() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    standby(&mut node, &transport);
    assert!(node.storage().session_open());
    assert_eq!(node.storage().sessions(), 1);

    node.receive(&broadcast(InboundKind::SetTime, &EPOCH_SECONDS.to_le_bytes()));

    // First trusted frame is processed on tick 18.
    passes(&mut node, &transport, 16);
    assert_eq!(node.storage().frames(), 1);
    assert_eq!(node.storage().last_frame_cells(), 4);
    assert_eq!(node.frame().timestamp, Some(EPOCH_SECONDS));
}

#[test]
fn write_failure_closes_the_session_until_next_standby() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    standby(&mut node, &transport);

    node.storage_mut().set_fail_writes(true);
    passes(&mut node, &transport, 16);
    assert!(!node.status().storage_session);
    assert!(events(&node).contains(&TelemetryEventKind::StorageFailed));

    node.storage_mut().set_fail_writes(false);
    passes(&mut node, &transport, 6);
    assert_eq!(node.storage().frames(), 0, "no writes after the session closed");
}

#[test]
fn off_ends_the_session() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    standby(&mut node, &transport);

    assert!(node.request_target(ModuleState::Off));
    passes(&mut node, &transport, 4);
    assert_eq!(node.durable().current(), ModuleState::Off);
    assert!(!node.storage().session_open());
    assert!(!node.status().storage_session);
}
