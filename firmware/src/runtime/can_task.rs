use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::can::frame::Frame;
use embassy_stm32::can::{BusErrorMode, CanConfigurator, Id};
use embassy_time::{Duration, Ticker};
use module_core::transport::{CanFrame, CanTransport, ControllerEvent, ErrorCounters};

use super::{NodeInput, post};
use crate::hw::can::{self as fdcan, BITRATE, FdcanController, OUTBOUND};

const HEALTH_PERIOD: Duration = Duration::from_millis(50);

embassy_stm32::bind_interrupts!(struct CanIrqs {
    TIM16_FDCAN_IT0 => embassy_stm32::can::IT0InterruptHandler<hal::peripherals::FDCAN1>;
    TIM17_FDCAN_IT1 => embassy_stm32::can::IT1InterruptHandler<hal::peripherals::FDCAN1>;
});

#[embassy_executor::task]
pub async fn run(
    transport: &'static CanTransport<FdcanController>,
    peripheral: Peri<'static, hal::peripherals::FDCAN1>,
    rx_pin: Peri<'static, hal::peripherals::PA11>,
    tx_pin: Peri<'static, hal::peripherals::PA12>,
) -> ! {
    let mut configurator = CanConfigurator::new(peripheral, rx_pin, tx_pin, CanIrqs);
    configurator.set_bitrate(BITRATE);
    let can = configurator.into_normal_mode();
    let (mut tx, mut rx, properties) = can.split();

    let mut health = Ticker::every(HEALTH_PERIOD);
    let mut bus_off = false;

    loop {
        match select3(OUTBOUND.receive(), rx.read(), health.next()).await {
            Either3::First((sequence, outbound)) => {
                match Frame::new_extended(outbound.id(), outbound.payload()) {
                    Ok(frame) => {
                        tx.write(&frame).await;
                        fdcan::mark_complete(sequence);
                        transport.on_event_for(sequence, ControllerEvent::TxComplete);
                    }
                    Err(_) => {
                        defmt::warn!("can: unencodable frame id={=u32:#x}", outbound.id());
                        fdcan::mark_failed(sequence);
                        transport.on_event_for(sequence, ControllerEvent::TxError);
                    }
                }
            }
            Either3::Second(Ok(envelope)) => {
                let Id::Extended(id) = envelope.frame.id() else {
                    continue;
                };
                if let Some(frame) = CanFrame::new(id.as_raw(), envelope.frame.data()) {
                    post(NodeInput::Frame(frame));
                }
            }
            Either3::Second(Err(_)) => defmt::debug!("can: receive error"),
            Either3::Third(()) => {
                let now_off = matches!(properties.bus_error_mode(), BusErrorMode::BusOff);
                fdcan::record_counters(
                    ErrorCounters {
                        transmit: properties.tx_error_count(),
                        receive: properties.rx_error_count(),
                    },
                    now_off,
                );
                if now_off && !bus_off {
                    defmt::warn!("can: bus-off");
                    transport.on_event(ControllerEvent::BusOff);
                }
                bus_off = now_off;
            }
        }
    }
}
