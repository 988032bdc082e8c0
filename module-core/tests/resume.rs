mod support;

use module_core::durable::{BootPath, DurableState, RecoveryTag, ResetCause, WatchdogLeash};
use module_core::node::sim::SimBoard;
use module_core::power::ModuleState;
use module_core::telemetry::TelemetryEventKind;
use support::{REGISTRATION_ID, config, events, transport};

/// Record as left by a reset in the middle of closing the switch.
fn interrupted_switch_on() -> DurableState {
    let mut snapshot = DurableState::cold();
    snapshot.set_current(ModuleState::Off);
    snapshot.register(REGISTRATION_ID);
    snapshot.set_max(ModuleState::On);
    snapshot.set_target(ModuleState::On);
    snapshot.set_recovery_tag(RecoveryTag::SwitchOn);
    snapshot
}

#[test]
fn watchdog_reset_resumes_the_interrupted_transition() {
    let (mut durable, path) =
        DurableState::resume(interrupted_switch_on(), ResetCause::Watchdog);
    assert_eq!(path, BootPath::Resume(RecoveryTag::SwitchOn));
    assert_eq!(durable.watchdog_resets(), 1);

    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(path);

    assert_eq!(node.durable().current(), ModuleState::On);
    assert_eq!(node.durable().recovery_tag(), RecoveryTag::Normal);
    assert!(node.power().outputs().relay());
    assert!(node.power().outputs().switch());
    assert_eq!(node.status().registration, Some(REGISTRATION_ID));
    assert_eq!(node.power().watchdog().leash(), WatchdogLeash::Long);

    let recorded = events(&node);
    assert_eq!(
        recorded.first(),
        Some(&TelemetryEventKind::Resumed(RecoveryTag::SwitchOn))
    );
    assert!(recorded.contains(&TelemetryEventKind::StateTransition {
        from: ModuleState::Off,
        to: ModuleState::On,
    }));
}

#[test]
fn power_on_reset_discards_the_record() {
    let (durable, path) = DurableState::resume(interrupted_switch_on(), ResetCause::PowerOn);
    assert_eq!(path, BootPath::ColdStart);
    assert_eq!(durable, DurableState::cold());
    assert!(!durable.is_registered());
}

#[test]
fn cold_boot_never_closes_outputs_before_registration() {
    let (mut durable, path) = DurableState::resume(interrupted_switch_on(), ResetCause::External);
    let transport = transport();
    let mut node = support::Node::new(&mut durable, &transport, SimBoard::parts(), config());
    node.boot(path);
    support::passes(&mut node, &transport, 12);

    assert_eq!(node.durable().current(), ModuleState::Off);
    assert!(!node.power().outputs().relay_ever_asserted());
    assert!(!node.power().outputs().switch_ever_asserted());
    assert_eq!(events(&node).first(), Some(&TelemetryEventKind::ColdStart));
}

#[test]
fn repeated_watchdog_resets_accumulate() {
    let (first, _) = DurableState::resume(interrupted_switch_on(), ResetCause::Watchdog);
    let (second, path) = DurableState::resume(first, ResetCause::Watchdog);
    assert_eq!(second.watchdog_resets(), 2);
    assert!(second.is_valid());
    assert!(matches!(path, BootPath::Resume(_)));
}
