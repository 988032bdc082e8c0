mod support;

use module_core::durable::{BootPath, DurableState};
use module_core::node::sim::SimBoard;
use module_core::power::ModuleState;
use module_core::scheduler::CONTACT_TIMEOUT_TICKS;
use module_core::telemetry::TelemetryEventKind;
use module_core::transport::{InboundKind, OutboundKind};
use support::{
    REGISTRATION_ID, addressed, config, drain, events, passes, registration, registration_for,
    transport,
};

#[test]
fn silence_deregisters_and_announces_again() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));

    let timeout = usize::from(CONTACT_TIMEOUT_TICKS);
    passes(&mut node, &transport, timeout - 1);
    assert_eq!(node.status().registration, Some(REGISTRATION_ID));

    passes(&mut node, &transport, 1);
    let status = node.status();
    assert_eq!(status.registration, None);
    assert_eq!(status.target, ModuleState::Off);
    assert!(status.announcement_pending);
    assert!(events(&node).contains(&TelemetryEventKind::ContactLost));

    // The announcement goes out on the next Write boundary.
    drain(&transport);
    passes(&mut node, &transport, 3);
    assert_eq!(drain(&transport), [OutboundKind::Announcement.to_raw()]);
    assert!(!node.status().announcement_pending);
}

#[test]
fn any_addressed_message_counts_as_contact() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));

    passes(&mut node, &transport, 100);
    node.receive(&addressed(InboundKind::StatusRequest, REGISTRATION_ID, &[]));
    assert_eq!(node.status().contact_ticks, 0);

    passes(&mut node, &transport, 100);
    assert_eq!(node.status().registration, Some(REGISTRATION_ID));
    assert!(!events(&node).contains(&TelemetryEventKind::ContactLost));
}

#[test]
fn registrations_for_other_modules_do_not_hold_contact() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));

    let other = support::UNIQUE_ID ^ 0x0100;
    let timeout = usize::from(CONTACT_TIMEOUT_TICKS);
    passes(&mut node, &transport, 100);
    node.receive(&registration_for(other, REGISTRATION_ID + 1));
    assert_eq!(node.status().contact_ticks, 100);

    passes(&mut node, &transport, timeout - 100);
    assert_eq!(node.status().registration, None);
    assert!(events(&node).contains(&TelemetryEventKind::ContactLost));
}

#[test]
fn status_request_mid_cycle_does_not_restart_the_cursor() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));

    passes(&mut node, &transport, 2);
    assert_eq!(
        drain(&transport),
        [OutboundKind::RequestTime.to_raw(), OutboundKind::Status1.to_raw()]
    );
    assert!(node.reports().cycle_in_flight());

    let request = addressed(InboundKind::StatusRequest, REGISTRATION_ID, &[]);
    assert_eq!(node.receive(&request), Some(InboundKind::StatusRequest));

    passes(&mut node, &transport, 6);
    let expected = [
        OutboundKind::Status2,
        OutboundKind::Status3,
        OutboundKind::CellCommStat1,
        OutboundKind::HardwareDetail,
    ]
    .map(OutboundKind::to_raw);
    assert_eq!(drain(&transport), expected);
}

#[test]
fn status_request_for_another_id_is_ignored() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));
    passes(&mut node, &transport, 8);
    drain(&transport);

    node.receive(&addressed(InboundKind::StatusRequest, REGISTRATION_ID + 1, &[]));
    assert!(!node.reports().cycle_in_flight());

    node.receive(&addressed(InboundKind::StatusRequest, REGISTRATION_ID, &[]));
    assert!(node.reports().cycle_in_flight());
}

#[test]
fn deregister_opens_outputs_and_stops_reports() {
    let mut durable = DurableState::cold();
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(BootPath::ColdStart);
    node.receive(&registration(REGISTRATION_ID));
    passes(&mut node, &transport, 1);
    assert!(node.request_max(ModuleState::Standby));
    assert!(node.request_target(ModuleState::Standby));
    passes(&mut node, &transport, 1);
    assert_eq!(node.durable().current(), ModuleState::Standby);

    node.receive(&addressed(InboundKind::Deregister, REGISTRATION_ID, &[]));
    assert_eq!(node.status().registration, None);
    assert!(events(&node).contains(&TelemetryEventKind::Deregistered));

    passes(&mut node, &transport, 4);
    drain(&transport);
    assert_eq!(node.durable().current(), ModuleState::Off);
    assert!(!node.power().outputs().relay());

    passes(&mut node, &transport, 12);
    assert!(drain(&transport).is_empty());
}
