use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Pull;

use super::FAULT_WAKE;
use crate::hw::power::{self, FAULTS};

/// Watches the overcurrent status line (low while latched) and the aux
/// supply good line (low when the 5 V rail drops). Runs on the interrupt
/// executor, so it opens the power stage even while the node task is
/// blocked in a settle delay.
#[embassy_executor::task]
pub async fn run(
    overcurrent_pin: Peri<'static, hal::peripherals::PB4>,
    overcurrent_ch: Peri<'static, hal::peripherals::EXTI4>,
    aux_pin: Peri<'static, hal::peripherals::PB5>,
    aux_ch: Peri<'static, hal::peripherals::EXTI5>,
) -> ! {
    let mut overcurrent = ExtiInput::new(overcurrent_pin, overcurrent_ch, Pull::Up);
    let mut aux = ExtiInput::new(aux_pin, aux_ch, Pull::Up);

    let overcurrent_edges = async {
        loop {
            overcurrent.wait_for_falling_edge().await;
            if FAULTS.overcurrent_edge() {
                power::open_switch();
                defmt::warn!("power: overcurrent");
                FAULT_WAKE.signal(());
            }
        }
    };

    let aux_loss = async {
        loop {
            aux.wait_for_falling_edge().await;
            power::open_stage();
            FAULTS.aux_power_lost();
            defmt::warn!("power: aux supply lost");
            FAULT_WAKE.signal(());
        }
    };

    join(overcurrent_edges, aux_loss).await;
    loop {
        core::future::pending::<()>().await;
    }
}
