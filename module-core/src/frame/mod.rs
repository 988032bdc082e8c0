//! Per-frame cell data: acquisition, conversion, and aggregation.
//!
//! The cell chain reports four bytes per cell (10-bit voltage, then an 8.4
//! fixed-point temperature, both little-endian). A [`CellAcquisition`] folds
//! the byte stream into the [`FrameRecord`]; at the start of each Write phase
//! the record is aggregated into the min/max/average figures the status
//! reports carry.

use core::fmt;

use heapless::Vec;

/// Cells the frame buffer can hold.
pub const MAX_CELLS: usize = 108;
/// Largest expected cell count accepted from configuration.
pub const TOTAL_CELL_COUNT_MAX: u8 = 94;
pub const BYTES_PER_CELL: usize = 4;
const ACQUISITION_BYTES: usize = MAX_CELLS * BYTES_PER_CELL;

/// Offset applied to temperatures reported in 0.01 °C.
pub const TEMPERATURE_BASE: i16 = 5535;
/// Marker for a missing or out-of-range temperature.
pub const TEMPERATURE_INVALID: i16 = -1;
/// Marker bit set by cells whose balancing load is active.
pub const CELL_DISCHARGE_ACTIVE: u16 = 0x8000;
/// Status bit a cell sets when its temperature sensor answered.
pub const CELL_TEMP_I2C_OK: u16 = 0x8000;
/// High/low cell spread that makes balancing worthwhile.
pub const BALANCE_VOLTAGE_THRESHOLD: u16 = 0x40;

/// Cell ADC counts to millivolts, in 1/512 fixed point:
/// `1.1 V * 1000 / (30100 / 121000) * 1.032 * 512`.
pub const VOLTAGE_CONVERSION_FACTOR: u32 = 2_336_475;
const FIXED_POINT_SCALE: u32 = 512;
const CELL_ADC_MAX: u32 = 1 << 10;
const CELL_VOLTAGE_MASK: u16 = 0x03ff;
const MIN_VALID_CELL_VOLTAGE: u16 = 0x01f0;
const MAX_VALID_CELL_VOLTAGE: u16 = 0x0400;
const MIN_VALID_CELL_TEMP: i16 = -20;
const MAX_VALID_CELL_TEMP: i16 = 120;
const FRACTIONAL_CENTI: [i16; 16] = [0, 6, 12, 18, 25, 31, 37, 43, 50, 56, 62, 68, 75, 81, 87, 93];

/// Per-cell string voltage bounds used to scale the string ADC, in mV.
const STRING_MV_PER_CELL_LOWER: i32 = 2250;
const STRING_MV_PER_CELL_UPPER: i32 = 4500;
const STRING_ADC_MAX: u16 = (1 << 10) - 1;
const STRING_ADC_FRACTION: i32 = 128;

/// Current reported while the module is not conducting: 0 A above a -655.36 A floor.
pub const CURRENT_ZERO: u16 = 32768;
const CURRENT_CONVERSION_FACTOR: i32 = 3200;
const CURRENT_ZERO_SAMPLES: usize = 8;

/// Raw report from one cell.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CellSample {
    pub voltage: u16,
    pub temperature: i16,
}

impl CellSample {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; BYTES_PER_CELL]) -> Self {
        Self {
            voltage: u16::from_le_bytes([bytes[0], bytes[1]]),
            temperature: i16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    /// Cell voltage in mV, when the reading is in range.
    #[must_use]
    pub fn voltage_mv(self) -> Option<u16> {
        cell_voltage_mv(self.voltage)
    }

    /// Temperature in 0.01 °C offset by [`TEMPERATURE_BASE`], when valid.
    #[must_use]
    pub fn temperature_centi(self) -> Option<i16> {
        cell_temperature(self.temperature)
    }
}

/// Converts a raw cell voltage reading to millivolts.
#[must_use]
pub fn cell_voltage_mv(raw: u16) -> Option<u16> {
    let counts = raw & CELL_VOLTAGE_MASK;
    if !(MIN_VALID_CELL_VOLTAGE..=MAX_VALID_CELL_VOLTAGE).contains(&counts) {
        return None;
    }
    let scaled = u32::from(counts) * VOLTAGE_CONVERSION_FACTOR;
    let millivolts = (scaled / CELL_ADC_MAX + FIXED_POINT_SCALE / 2) / FIXED_POINT_SCALE;
    u16::try_from(millivolts).ok()
}

/// Strips status bits from a raw temperature, returning 1/16 °C when in range.
#[must_use]
pub fn normalize_temperature(raw: i16) -> Option<i16> {
    if raw == TEMPERATURE_INVALID {
        return None;
    }
    let bits = raw.to_le_bytes();
    let mut word = u16::from_le_bytes(bits);
    if word & (1 << 12) != 0 {
        word |= 0xf000;
    } else {
        word &= !CELL_TEMP_I2C_OK;
    }
    let normalized = i16::from_le_bytes(word.to_le_bytes());
    let whole = normalized >> 4;
    if (MIN_VALID_CELL_TEMP..=MAX_VALID_CELL_TEMP).contains(&whole) {
        Some(normalized)
    } else {
        None
    }
}

/// Converts a raw temperature to 0.01 °C offset by [`TEMPERATURE_BASE`].
#[must_use]
pub fn cell_temperature(raw: i16) -> Option<i16> {
    let normalized = normalize_temperature(raw)?;
    let fraction = FRACTIONAL_CENTI[usize::from(normalized.to_le_bytes()[0] & 0x0f)];
    Some((normalized >> 4) * 100 + fraction + TEMPERATURE_BASE)
}

/// Analog channels sampled once per tick, in conversion order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdcChannel {
    StringVoltage,
    Current,
    CurrentReference,
    TemperatureSettle,
    Temperature,
}

impl AdcChannel {
    pub const COUNT: usize = 5;

    pub const ALL: [AdcChannel; Self::COUNT] = [
        AdcChannel::StringVoltage,
        AdcChannel::Current,
        AdcChannel::CurrentReference,
        AdcChannel::TemperatureSettle,
        AdcChannel::Temperature,
    ];

    /// Channel whose completion marks a full pass.
    pub const LAST: AdcChannel = AdcChannel::Temperature;

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            AdcChannel::StringVoltage => 0,
            AdcChannel::Current => 1,
            AdcChannel::CurrentReference => 2,
            AdcChannel::TemperatureSettle => 3,
            AdcChannel::Temperature => 4,
        }
    }
}

/// Running zero-current reference filter for the hall sensor.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CurrentFilter {
    zero: [i16; CURRENT_ZERO_SAMPLES],
    next: Option<usize>,
}

impl CurrentFilter {
    /// Folds in one pair of readings and returns the current in 0.02 A units above the floor.
    pub fn convert(&mut self, sense: u16, reference: u16) -> u16 {
        let reference = i16::try_from(reference).unwrap_or(i16::MAX);
        match self.next {
            None => {
                self.zero = [reference; CURRENT_ZERO_SAMPLES];
                self.next = Some(0);
            }
            Some(index) => {
                self.zero[index] = reference;
                self.next = Some((index + 1) % CURRENT_ZERO_SAMPLES);
            }
        }

        let total: i32 = self.zero.iter().copied().map(i32::from).sum();
        let zero = total / 8;
        let delta = i32::from(sense) - zero;
        let scaled = (delta * CURRENT_CONVERSION_FACTOR + 256) / 512;
        let biased = scaled + i32::from(CURRENT_ZERO);
        u16::from_le_bytes([biased.to_le_bytes()[0], biased.to_le_bytes()[1]])
    }
}

/// Data gathered and derived during one frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRecord {
    pub unique_id: u32,
    pub expected_cells: u8,
    pub string_min_mv: i32,
    pub string_max_mv: i32,
    pub string_mv_per_count: i16,
    pub cells: [CellSample; MAX_CELLS],
    pub cell_count: u8,
    pub bytes_received: u16,
    pub fewest_cells: u8,
    pub most_cells: u8,
    pub framing_errors: u8,
    pub i2c_errors: u16,
    pub first_i2c_error: u8,
    pub lowest_mv: u16,
    pub highest_mv: u16,
    pub average_mv: u16,
    pub total_mv: u32,
    pub lowest_temp: i16,
    pub highest_temp: i16,
    pub average_temp: i16,
    pub discharge_active: bool,
    pub adc: [Option<u16>; AdcChannel::COUNT],
    pub current: u16,
    pub min_current: u16,
    pub max_current: u16,
    pub timestamp: Option<u64>,
}

/// Side effects of [`FrameRecord::process`] the caller acts on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessOutcome {
    /// Fewest/most counts or framing errors changed.
    pub comm_stats_changed: bool,
    /// The high/low cell spread reached [`BALANCE_VOLTAGE_THRESHOLD`].
    pub spread_exceeded: bool,
}

impl FrameRecord {
    #[must_use]
    pub fn new(unique_id: u32, expected_cells: u8) -> Self {
        let mut frame = Self {
            unique_id,
            expected_cells: 0,
            string_min_mv: 0,
            string_max_mv: 0,
            string_mv_per_count: 0,
            cells: [CellSample::default(); MAX_CELLS],
            cell_count: 0,
            bytes_received: 0,
            fewest_cells: 0xff,
            most_cells: 0,
            framing_errors: 0,
            i2c_errors: 0,
            first_i2c_error: 0xff,
            lowest_mv: 0,
            highest_mv: 0,
            average_mv: 0,
            total_mv: 0,
            lowest_temp: TEMPERATURE_BASE,
            highest_temp: TEMPERATURE_BASE,
            average_temp: TEMPERATURE_BASE,
            discharge_active: false,
            adc: [None; AdcChannel::COUNT],
            current: CURRENT_ZERO,
            min_current: u16::MAX,
            max_current: 0,
            timestamp: None,
        };
        frame.set_expected_cells(expected_cells);
        frame
    }

    /// Sets the expected count (clipped) and rescales the string voltage range.
    pub fn set_expected_cells(&mut self, count: u8) {
        let count = count.min(TOTAL_CELL_COUNT_MAX);
        self.expected_cells = count;
        self.string_min_mv = STRING_MV_PER_CELL_LOWER * i32::from(count);
        self.string_max_mv = STRING_MV_PER_CELL_UPPER * i32::from(count);
        let per_count = ((self.string_max_mv - self.string_min_mv) * STRING_ADC_FRACTION) / 1024;
        self.string_mv_per_count = i16::try_from(per_count).unwrap_or(i16::MAX);
    }

    /// Clears the cell readings ahead of a new acquisition.
    pub fn reset_cells(&mut self) {
        self.total_mv = 0;
        self.highest_mv = 0;
        self.lowest_mv = 0;
        self.average_mv = 0;
        self.cells = [CellSample::default(); MAX_CELLS];
        self.discharge_active = false;
        self.i2c_errors = 0;
        self.first_i2c_error = 0;
        self.cell_count = 0;
        self.framing_errors = 0;
        self.lowest_temp = TEMPERATURE_BASE;
        self.highest_temp = TEMPERATURE_BASE;
        self.average_temp = TEMPERATURE_BASE;
    }

    /// Restarts the fewest/most statistics after a sensor chain power cycle.
    pub fn reset_count_extremes(&mut self) {
        self.fewest_cells = 0xff;
        self.most_cells = 0;
    }

    /// Stores a reading as reported by the ADC driver. Returns `true` at the end of a full pass.
    pub fn record_adc(&mut self, channel: AdcChannel, reading: u16) -> bool {
        self.adc[channel.index()] = Some(reading);
        channel == AdcChannel::LAST
    }

    #[must_use]
    pub fn adc(&self, channel: AdcChannel) -> Option<u16> {
        self.adc[channel.index()]
    }

    /// Converts the latest current readings, tracking the frame extremes.
    pub fn update_current(&mut self, filter: &mut CurrentFilter) {
        let (Some(sense), Some(reference)) = (
            self.adc(AdcChannel::Current),
            self.adc(AdcChannel::CurrentReference),
        ) else {
            return;
        };
        self.current = filter.convert(sense, reference);
        self.max_current = self.max_current.max(self.current);
        self.min_current = self.min_current.min(self.current);
    }

    /// Module current for status reports; only a conducting module reports measured current.
    #[must_use]
    pub fn reported_current(&self, conducting: bool) -> u16 {
        let readings_valid = self.adc(AdcChannel::Current).is_some()
            && self.adc(AdcChannel::CurrentReference).is_some();
        if readings_valid && conducting {
            self.current
        } else {
            CURRENT_ZERO
        }
    }

    /// String voltage from the (inverted) string ADC, in 15 mV units.
    #[must_use]
    pub fn string_voltage_units(&self) -> u16 {
        let counts = self
            .adc(AdcChannel::StringVoltage)
            .map_or(0, |reading| STRING_ADC_MAX.saturating_sub(reading));
        let per_count = u32::from(self.string_mv_per_count.unsigned_abs());
        let mut millivolts = u32::from(counts) * per_count;
        millivolts /= 128;
        millivolts += self.string_min_mv.unsigned_abs();
        truncate_u16(millivolts / 15)
    }

    /// Sum of cell voltages in 15 mV units.
    #[must_use]
    pub fn cell_total_units(&self) -> u16 {
        truncate_u16(self.total_mv / 15)
    }

    /// Loads and aggregates the cells received this frame.
    pub fn process(&mut self, acquisition: &CellAcquisition) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();
        let bytes_received = acquisition.received();
        let cell_count = acquisition.cell_count();
        self.bytes_received = bytes_received;
        self.cell_count = cell_count;
        for (slot, sample) in self.cells.iter_mut().zip(acquisition.cells()) {
            *slot = sample;
        }
        if bytes_received == 0 {
            return outcome;
        }

        self.first_i2c_error = 0xff;

        if self.fewest_cells > cell_count {
            self.fewest_cells = cell_count;
            outcome.comm_stats_changed = true;
        }
        if self.most_cells < cell_count {
            self.most_cells = cell_count;
            outcome.comm_stats_changed = true;
        }
        if usize::from(bytes_received) % BYTES_PER_CELL != 0 && self.framing_errors != 0xff {
            self.framing_errors += 1;
            outcome.comm_stats_changed = true;
        }

        let mut highest_mv = 0u16;
        let mut lowest_mv = u16::MAX;
        let mut total_mv = 0u32;
        let mut voltage_count = 0u32;
        let mut highest_raw = i16::MIN;
        let mut lowest_raw = i16::MAX;
        let mut temp_total = 0i32;
        let mut temp_count = 0i32;

        let count = usize::from(cell_count).min(MAX_CELLS);
        for cell in &self.cells[..count] {
            if let Some(normalized) = normalize_temperature(cell.temperature) {
                highest_raw = highest_raw.max(normalized);
                lowest_raw = lowest_raw.min(normalized);
                temp_total += i32::from(normalized);
                temp_count += 1;
            }

            if cell.voltage & CELL_DISCHARGE_ACTIVE != 0 {
                self.discharge_active = true;
            }

            if let Some(millivolts) = cell.voltage_mv() {
                highest_mv = highest_mv.max(millivolts);
                lowest_mv = lowest_mv.min(millivolts);
                total_mv += u32::from(millivolts);
                voltage_count += 1;
            }
        }

        self.highest_mv = highest_mv;
        self.lowest_mv = lowest_mv;
        if voltage_count > 0 {
            self.total_mv = total_mv;
            self.average_mv = truncate_u16(total_mv / voltage_count);
            outcome.spread_exceeded = highest_mv >= lowest_mv
                && highest_mv - lowest_mv >= BALANCE_VOLTAGE_THRESHOLD;
        } else {
            self.average_mv = 0;
        }

        if temp_count > 0 {
            let average_raw = i16::try_from(temp_total / temp_count).unwrap_or(TEMPERATURE_INVALID);
            self.average_temp = cell_temperature(average_raw).unwrap_or(TEMPERATURE_INVALID);
            self.highest_temp = cell_temperature(highest_raw).unwrap_or(TEMPERATURE_INVALID);
            self.lowest_temp = cell_temperature(lowest_raw).unwrap_or(TEMPERATURE_INVALID);
        }

        outcome
    }

    /// Detail report for one cell, when it was received this frame.
    #[must_use]
    pub fn cell_detail(&self, index: u8) -> Option<CellDetail> {
        if index >= self.cell_count || usize::from(index) >= MAX_CELLS {
            return None;
        }
        let sample = self.cells[usize::from(index)];
        let voltage_mv = sample.voltage_mv().unwrap_or(0);
        let temperature = sample.temperature_centi().unwrap_or(TEMPERATURE_INVALID);
        let state_of_charge = (u32::from(voltage_mv) / 4100) * 100;
        let spread = u32::from(self.highest_mv.wrapping_sub(self.lowest_mv));
        let state_of_health = u32::from(voltage_mv)
            .checked_div(spread)
            .map_or(0, |ratio| ratio * 100);
        Some(CellDetail {
            index,
            voltage_mv,
            temperature,
            state_of_charge: state_of_charge.to_le_bytes()[0],
            state_of_health: state_of_health.to_le_bytes()[0],
        })
    }
}

/// Converted values for one cell.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CellDetail {
    pub index: u8,
    pub voltage_mv: u16,
    pub temperature: i16,
    pub state_of_charge: u8,
    pub state_of_health: u8,
}

impl fmt::Display for CellDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cell {} {}mV temp={}",
            self.index, self.voltage_mv, self.temperature
        )
    }
}

/// Byte stream received from the cell chain during one acquisition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CellAcquisition {
    bytes: Vec<u8, ACQUISITION_BYTES>,
    received: u16,
}

impl CellAcquisition {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            received: 0,
        }
    }

    /// Starts a fresh acquisition at cell 0.
    pub fn begin(&mut self) {
        self.bytes.clear();
        self.received = 0;
    }

    /// Accepts one byte from the chain. Bytes past the frame buffer are counted but dropped.
    pub fn push(&mut self, byte: u8) {
        self.received = self.received.saturating_add(1);
        let _ = self.bytes.push(byte);
    }

    /// Bytes received, including any dropped for lack of space.
    #[must_use]
    pub fn received(&self) -> u16 {
        self.received
    }

    /// Complete cells received.
    #[must_use]
    pub fn cell_count(&self) -> u8 {
        u8::try_from(self.bytes.len() / BYTES_PER_CELL).unwrap_or(u8::MAX)
    }

    pub fn cells(&self) -> impl Iterator<Item = CellSample> + '_ {
        self.bytes.chunks_exact(BYTES_PER_CELL).map(|chunk| {
            CellSample::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
        })
    }
}

fn truncate_u16(value: u32) -> u16 {
    let bytes = value.to_le_bytes();
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_cell(acquisition: &mut CellAcquisition, voltage: u16, temp: u16) {
        for byte in voltage.to_le_bytes().into_iter().chain(temp.to_le_bytes()) {
            acquisition.push(byte);
        }
    }

    #[test]
    fn converts_cell_voltage_with_fixed_point_factor() {
        assert_eq!(cell_voltage_mv(0x0347), Some(3739));
        assert_eq!(cell_voltage_mv(0x01f0), Some(2210));
        assert_eq!(cell_voltage_mv(0x01ef), None);
        assert_eq!(cell_voltage_mv(0x8347), Some(3739));
    }

    #[test]
    fn converts_temperature_and_masks_status_bit() {
        // 21 + 15/16 °C with the sensor-ok bit set.
        assert_eq!(cell_temperature(i16::from_le_bytes(0x815fu16.to_le_bytes())), Some(2193 + TEMPERATURE_BASE));
        assert_eq!(cell_temperature(0x0190), Some(2500 + TEMPERATURE_BASE));
        assert_eq!(cell_temperature(0x0800), None);
        assert_eq!(cell_temperature(TEMPERATURE_INVALID), None);
    }

    #[test]
    fn negative_temperatures_are_sign_extended() {
        // -5 °C in 8.4 with the sign in bit 12.
        let raw = i16::from_le_bytes(0x1fb0u16.to_le_bytes());
        assert_eq!(cell_temperature(raw), Some(-500 + TEMPERATURE_BASE));
    }

    #[test]
    fn acquisition_assembles_cells_and_flags_partial_bytes() {
        let mut frame = FrameRecord::new(1, 3);
        let mut acquisition = CellAcquisition::new();
        push_cell(&mut acquisition, 0x0347, 0x815f);
        push_cell(&mut acquisition, 0x0340, 0x8150);
        acquisition.push(0x11);
        assert_eq!((acquisition.received(), acquisition.cell_count()), (9, 2));

        let outcome = frame.process(&acquisition);
        assert!(outcome.comm_stats_changed);
        assert_eq!(frame.framing_errors, 1);
        assert_eq!(frame.fewest_cells, 2);
        assert_eq!(frame.most_cells, 2);
        assert_eq!(frame.highest_mv, 3739);
        assert_eq!(frame.lowest_mv, cell_voltage_mv(0x0340).expect("valid"));
        assert_eq!(frame.total_mv, u32::from(frame.highest_mv) + u32::from(frame.lowest_mv));
    }

    #[test]
    fn empty_frame_is_not_processed() {
        let mut frame = FrameRecord::new(1, 3);
        let outcome = frame.process(&CellAcquisition::new());
        assert_eq!(outcome, ProcessOutcome::default());
        assert_eq!(frame.fewest_cells, 0xff);
    }

    #[test]
    fn cell_detail_guards_zero_spread() {
        let mut frame = FrameRecord::new(1, 1);
        let mut acquisition = CellAcquisition::new();
        push_cell(&mut acquisition, 0x0347, 0x815f);
        frame.process(&acquisition);

        let detail = frame.cell_detail(0).expect("cell 0");
        assert_eq!(detail.voltage_mv, 3739);
        assert_eq!(detail.state_of_charge, 0);
        assert_eq!(detail.state_of_health, 0);
        assert!(frame.cell_detail(1).is_none());
    }

    #[test]
    fn string_voltage_scales_between_cell_bounds() {
        let mut frame = FrameRecord::new(1, 10);
        assert_eq!(frame.string_voltage_units(), 1500);

        frame.record_adc(AdcChannel::StringVoltage, 0);
        // Fully inverted reading is the upper bound: 10 * 4.5 V / 15 mV.
        assert_eq!(frame.string_voltage_units(), 2998);
    }

    #[test]
    fn current_filter_reports_zero_for_balanced_readings() {
        let mut filter = CurrentFilter::default();
        assert_eq!(filter.convert(512, 512), CURRENT_ZERO);
        // One count above the reference is 6.25 units of 0.02 A.
        assert_eq!(filter.convert(513, 512), CURRENT_ZERO + 6);
    }

    #[test]
    fn acquisition_drops_bytes_past_the_frame_buffer() {
        let mut acquisition = CellAcquisition::new();
        for _ in 0..(MAX_CELLS * BYTES_PER_CELL + 3) {
            acquisition.push(0);
        }
        assert_eq!(usize::from(acquisition.cell_count()), MAX_CELLS);
        assert_eq!(usize::from(acquisition.received()), MAX_CELLS * BYTES_PER_CELL + 3);

        acquisition.begin();
        assert_eq!(acquisition.received(), 0);
    }

    #[test]
    fn expected_count_is_clipped() {
        let frame = FrameRecord::new(1, 200);
        assert_eq!(frame.expected_cells, TOTAL_CELL_COUNT_MAX);
    }
}
