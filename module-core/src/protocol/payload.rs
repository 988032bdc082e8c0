//! Eight-byte payload layouts for the module's outbound messages.
//!
//! Every multi-byte field is little-endian.

use crate::frame::{CellDetail, FrameRecord};
use crate::power::ModuleState;

pub const PAYLOAD_LEN: usize = 8;

/// Firmware build reported in the announcement.
pub const FIRMWARE_BUILD: u16 = 8278;
pub const MANUFACTURER_ID: u8 = 0x02;
pub const PART_ID: u8 = 0x03;
pub const HARDWARE_COMPATIBILITY: u16 = 0;

/// Charge limit reported when none is configured: 10 A above the -655.36 A floor.
pub const DEFAULT_MAX_CHARGE_CURRENT: u16 = 33268;
/// Discharge limit reported when none is configured: -42 A above the floor.
pub const DEFAULT_MAX_DISCHARGE_CURRENT: u16 = 30668;

/// Charge/discharge permission nibble. Both are always prohibited for now.
const PERMISSION_PROHIBITED: u8 = 0;

pub type Payload = [u8; PAYLOAD_LEN];

#[must_use]
pub fn announcement(unique_id: u32) -> Payload {
    let build = FIRMWARE_BUILD.to_le_bytes();
    let id = unique_id.to_le_bytes();
    [build[0], build[1], MANUFACTURER_ID, PART_ID, id[0], id[1], id[2], id[3]]
}

#[must_use]
pub fn time_request() -> Payload {
    [0; PAYLOAD_LEN]
}

/// Summary of module condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Status1 {
    pub state: ModuleState,
    pub state_of_charge: u8,
    pub state_of_health: u8,
    pub expected_cells: u8,
    /// 0.02 A units above the floor.
    pub current: u16,
    /// 15 mV units.
    pub string_voltage: u16,
}

impl Status1 {
    #[must_use]
    pub fn encode(&self) -> Payload {
        let current = self.current.to_le_bytes();
        let voltage = self.string_voltage.to_le_bytes();
        [
            (self.state.to_raw() & 0x0f) | (PERMISSION_PROHIBITED << 4),
            self.state_of_charge,
            self.state_of_health,
            self.expected_cells,
            current[0],
            current[1],
            voltage[0],
            voltage[1],
        ]
    }
}

/// Lowest, highest, and average cell voltage (mV), then the cell total in 15 mV units.
#[must_use]
pub fn status2(frame: &FrameRecord) -> Payload {
    words([
        frame.lowest_mv,
        frame.highest_mv,
        frame.average_mv,
        frame.cell_total_units(),
    ])
}

/// Lowest, highest, and average cell temperature.
#[must_use]
pub fn status3(frame: &FrameRecord) -> Payload {
    words([
        u16::from_le_bytes(frame.lowest_temp.to_le_bytes()),
        u16::from_le_bytes(frame.highest_temp.to_le_bytes()),
        u16::from_le_bytes(frame.average_temp.to_le_bytes()),
        0,
    ])
}

#[must_use]
pub fn cell_detail(detail: &CellDetail, expected_cells: u8) -> Payload {
    let temperature = detail.temperature.to_le_bytes();
    let voltage = detail.voltage_mv.to_le_bytes();
    [
        detail.index,
        expected_cells,
        temperature[0],
        temperature[1],
        voltage[0],
        voltage[1],
        detail.state_of_charge,
        detail.state_of_health,
    ]
}

/// Cell chain communication statistics.
#[must_use]
pub fn comm_stats(frame: &FrameRecord) -> Payload {
    let i2c = frame.i2c_errors.to_le_bytes();
    // The first failing cell is counted from the far end of the chain.
    let first_error = if frame.first_i2c_error == 0xff {
        0xff
    } else {
        frame.cell_count.wrapping_sub(frame.first_i2c_error)
    };
    [
        frame.fewest_cells,
        frame.most_cells,
        i2c[0],
        i2c[1],
        frame.framing_errors,
        first_error,
        0,
        0,
    ]
}

/// Current limits, substituting defaults for unprogrammed values.
#[must_use]
pub fn hardware_detail(max_charge: u16, max_discharge: u16) -> Payload {
    words([
        programmed_or(max_charge, DEFAULT_MAX_CHARGE_CURRENT),
        programmed_or(max_discharge, DEFAULT_MAX_DISCHARGE_CURRENT),
        0,
        HARDWARE_COMPATIBILITY,
    ])
}

/// `value`, or `default` when the parameter reads as unprogrammed.
#[must_use]
pub const fn programmed_or(value: u16, default: u16) -> u16 {
    match value {
        0 | u16::MAX => default,
        value => value,
    }
}

fn words(values: [u16; 4]) -> Payload {
    let mut payload = [0; PAYLOAD_LEN];
    for (chunk, value) in payload.chunks_exact_mut(2).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_carries_build_identity_and_unique_id() {
        assert_eq!(
            announcement(0x1234_5678),
            [0x56, 0x20, 0x02, 0x03, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn status1_packs_state_nibble_and_words() {
        let payload = Status1 {
            state: ModuleState::On,
            state_of_charge: 80,
            state_of_health: 95,
            expected_cells: 12,
            current: 32768,
            string_voltage: 0x0a8c,
        }
        .encode();
        assert_eq!(payload, [0x03, 80, 95, 12, 0x00, 0x80, 0x8c, 0x0a]);
    }

    #[test]
    fn hardware_detail_substitutes_defaults() {
        let payload = hardware_detail(0xffff, 0);
        assert_eq!(u16::from_le_bytes([payload[0], payload[1]]), 33268);
        assert_eq!(u16::from_le_bytes([payload[2], payload[3]]), 30668);
        assert_eq!(&payload[4..], &[0, 0, 0, 0]);

        let payload = hardware_detail(1000, 2000);
        assert_eq!(u16::from_le_bytes([payload[0], payload[1]]), 1000);
        assert_eq!(u16::from_le_bytes([payload[2], payload[3]]), 2000);
    }

    #[test]
    fn comm_stats_without_i2c_errors_report_ff() {
        let mut frame = FrameRecord::new(1, 4);
        frame.fewest_cells = 3;
        frame.most_cells = 4;
        frame.framing_errors = 2;
        frame.i2c_errors = 0x0102;
        frame.first_i2c_error = 0xff;
        assert_eq!(comm_stats(&frame), [3, 4, 0x02, 0x01, 2, 0xff, 0, 0]);

        frame.cell_count = 4;
        frame.first_i2c_error = 1;
        assert_eq!(comm_stats(&frame)[5], 3);
    }

    #[test]
    fn status3_reports_temperatures_as_twos_complement() {
        let frame = FrameRecord::new(1, 4);
        let payload = status3(&frame);
        assert_eq!(i16::from_le_bytes([payload[0], payload[1]]), 5535);
        assert_eq!(&payload[6..], &[0, 0]);
    }
}
