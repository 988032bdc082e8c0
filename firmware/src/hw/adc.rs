//! Analog sampling. The node asks for a pass; the ADC task performs it and
//! posts the readings back as one node input.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use module_core::collaborators::AdcDriver;

pub static CONVERSION_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub struct SignalledAdc;

impl AdcDriver for SignalledAdc {
    fn start_conversion(&mut self) {
        CONVERSION_REQUEST.signal(());
    }
}
