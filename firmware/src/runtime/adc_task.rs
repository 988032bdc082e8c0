use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, AdcChannel as _, AnyAdcChannel, SampleTime};
use module_core::frame::AdcChannel;

use super::{NodeInput, post};
use crate::hw::adc::CONVERSION_REQUEST;

#[embassy_executor::task]
pub async fn run(
    adc: Peri<'static, hal::peripherals::ADC1>,
    string_voltage: Peri<'static, hal::peripherals::PA0>,
    current: Peri<'static, hal::peripherals::PA1>,
    current_reference: Peri<'static, hal::peripherals::PA4>,
    temperature_settle: Peri<'static, hal::peripherals::PA5>,
    temperature: Peri<'static, hal::peripherals::PA6>,
) -> ! {
    let mut adc = Adc::new(adc);
    adc.set_sample_time(SampleTime::CYCLES160_5);

    // Conversion order matches `AdcChannel::ALL`.
    let mut inputs: [AnyAdcChannel<hal::peripherals::ADC1>; AdcChannel::COUNT] = [
        string_voltage.degrade_adc(),
        current.degrade_adc(),
        current_reference.degrade_adc(),
        temperature_settle.degrade_adc(),
        temperature.degrade_adc(),
    ];

    loop {
        CONVERSION_REQUEST.wait().await;
        let mut readings = [0u16; AdcChannel::COUNT];
        for (reading, input) in readings.iter_mut().zip(inputs.iter_mut()) {
            *reading = adc.blocking_read(input);
        }
        post(NodeInput::AdcPass(readings));
    }
}
