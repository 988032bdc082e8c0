use embassy_futures::select::{Either, select};
use module_core::frame::AdcChannel;

use super::{CONSOLE_OUT, FAULT_WAKE, NODE_INPUTS, Node, NodeInput};
use crate::console::{self, Reply};
use crate::hw::power::FAULTS;
use crate::status;
use crate::telemetry::TelemetryDrain;

#[embassy_executor::task]
pub async fn run(node: &'static mut Node) -> ! {
    let mut drain = TelemetryDrain::new();
    drain.drain(node.telemetry());

    loop {
        let input = match select(NODE_INPUTS.receive(), FAULT_WAKE.wait()).await {
            Either::First(input) => Some(input),
            Either::Second(()) => None,
        };

        apply_faults(node);
        if let Some(input) = input {
            apply(node, &input);
        }
        // Again for faults latched while the input was applied.
        apply_faults(node);

        node.service();
        drain.drain(node.telemetry());
    }
}

fn apply_faults(node: &mut Node) {
    let pending = FAULTS.take();
    if pending.overcurrent {
        node.overcurrent_edge();
    }
    if pending.aux_power_lost {
        node.aux_power_lost();
    }
}

fn apply(node: &mut Node, input: &NodeInput) {
    match input {
        NodeInput::Tick => {
            status::record_tick();
            node.on_timer_tick();
        }
        NodeInput::Frame(frame) => {
            status::record_frame_received();
            if node.receive(frame).is_none() {
                defmt::trace!("can: ignored id={=u32:#x}", frame.id());
            }
        }
        NodeInput::AdcPass(readings) => {
            for (channel, &reading) in AdcChannel::ALL.into_iter().zip(readings) {
                node.on_adc_reading(channel, reading);
            }
        }
        NodeInput::Console(line) => {
            status::record_console_line();
            let mut reply = Reply::new();
            if console::respond(node, line.as_str(), &mut reply).is_err() {
                defmt::warn!("console: reply truncated");
            }
            if CONSOLE_OUT.try_write(reply.as_bytes()).is_err() {
                defmt::warn!("console: output pipe full");
            }
        }
    }
}
