//! Register allocation and encoding for fixed-width register protocols.
//!
//! ## Allocation
//!
//! Sensors are processed in definition order with a free-address cursor
//! starting at 0. Each sensor starts at its explicit address if it has one,
//! otherwise at the cursor, and reserves `data_type.register_width()`
//! registers. The cursor then advances to `max(cursor, start + width)`, so an
//! explicit address below the cursor leaves it untouched and one above it
//! leaves a gap.
//!
//! Overlapping reservations are rejected rather than silently aliased.
//!
//! ## Encoding
//!
//! - BOOL: one register, 0 or 1
//! - INT: one register, clamped to `i16` and stored as two's complement
//! - FLOAT: IEEE-754 `f32`, big-endian, high word first

use serde::Serialize;

use crate::sensor::{DataType, SensorDefinition, SensorId, SensorValue};

/// Minimum number of entries in each register table.
pub const MIN_BANK_SIZE: usize = 100;

/// Spare entries added after the last allocated register.
pub const BANK_HEADROOM: usize = 10;

/// Registers reserved for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterSlot {
    /// Sensor owning the range
    pub sensor: SensorId,
    /// First register of the range
    pub start: u16,
    /// Number of registers in the range
    pub width: u16,
    /// Type used to encode values into the range
    pub data_type: DataType,
}

impl RegisterSlot {
    /// One past the last register of the range.
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.width)
    }

    fn overlaps(&self, start: u32, end: u32) -> bool {
        u32::from(self.start) < end && start < self.end()
    }
}

/// Result of allocating a device's sensors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterLayout {
    slots: Vec<RegisterSlot>,
    total: u32,
}

impl RegisterLayout {
    /// Slots in definition order.
    pub fn slots(&self) -> &[RegisterSlot] {
        &self.slots
    }

    /// Slot for a sensor.
    pub fn slot(&self, sensor: SensorId) -> Option<&RegisterSlot> {
        self.slots.iter().find(|slot| slot.sensor == sensor)
    }

    /// Final cursor position: the register count the layout spans.
    pub fn total_registers(&self) -> u32 {
        self.total
    }

    /// Size of each backing register table: `max(100, total + 10)`.
    pub fn bank_size(&self) -> usize {
        (self.total as usize + BANK_HEADROOM).max(MIN_BANK_SIZE)
    }
}

/// Cursor-based register allocator.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    cursor: u32,
    slots: Vec<RegisterSlot>,
}

impl RegisterAllocator {
    /// Create an allocator with its cursor at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate every sensor in order.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::Overlap` if two ranges share a register and
    /// `RegisterError::OutOfRange` if a range ends past address 65535.
    pub fn allocate(sensors: &[SensorDefinition]) -> Result<RegisterLayout, RegisterError> {
        let mut allocator = Self::new();
        for sensor in sensors {
            allocator.reserve(sensor.id, sensor.data_type, sensor.address)?;
        }
        Ok(allocator.finish())
    }

    /// Reserve registers for one sensor.
    ///
    /// # Errors
    ///
    /// See [`RegisterAllocator::allocate`].
    pub fn reserve(
        &mut self,
        sensor: SensorId,
        data_type: DataType,
        explicit: Option<u16>,
    ) -> Result<RegisterSlot, RegisterError> {
        let width = data_type.register_width();
        let start = explicit.map_or(self.cursor, u32::from);
        let end = start + u32::from(width);

        if end > u32::from(u16::MAX) + 1 {
            return Err(RegisterError::OutOfRange { sensor, start, width });
        }
        if let Some(taken) = self.slots.iter().find(|slot| slot.overlaps(start, end)) {
            return Err(RegisterError::Overlap { sensor, other: taken.sensor, start, end });
        }

        #[allow(clippy::cast_possible_truncation)]
        let slot = RegisterSlot { sensor, start: start as u16, width, data_type };
        self.cursor = self.cursor.max(end);
        self.slots.push(slot);

        tracing::debug!(sensor, start, end = end - 1, "registers reserved");
        Ok(slot)
    }

    /// Finish allocation.
    pub fn finish(self) -> RegisterLayout {
        RegisterLayout { slots: self.slots, total: self.cursor }
    }
}

/// Errors from register allocation and access
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// Two sensors claim the same register
    #[error("sensor {sensor}: registers {start}..{end} overlap sensor {other}")]
    Overlap {
        /// Sensor being allocated
        sensor: SensorId,
        /// Sensor already holding the register
        other: SensorId,
        /// Requested start
        start: u32,
        /// Requested end (exclusive)
        end: u32,
    },

    /// Range does not fit the 16-bit address space
    #[error("sensor {sensor}: {width} registers at {start} exceed the address space")]
    OutOfRange {
        /// Sensor being allocated
        sensor: SensorId,
        /// Requested start
        start: u32,
        /// Requested width
        width: u16,
    },

    /// Access past the end of a register table
    #[error("illegal address: {count} entries at {start} (table size {size})")]
    IllegalAddress {
        /// First entry requested
        start: u16,
        /// Number of entries requested
        count: u16,
        /// Table size
        size: usize,
    },
}

/// Encode a value into the registers of a slot of type `data_type`.
///
/// The declared type wins over the value's variant: an INT slot receives
/// the value truncated towards zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode(value: SensorValue, data_type: DataType) -> Vec<u16> {
    match data_type {
        DataType::Bool => {
            let on = match value {
                SensorValue::Bool(v) => v,
                other => other.as_f64() != 0.0,
            };
            vec![u16::from(on)]
        },
        DataType::Int => {
            let raw = match value {
                SensorValue::Int(v) => v,
                other => other.as_f64() as i64,
            };
            let clamped = raw.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16;
            vec![clamped as u16]
        },
        DataType::Float => {
            let bits = (value.as_f64() as f32).to_bits();
            vec![(bits >> 16) as u16, (bits & 0xFFFF) as u16]
        },
    }
}

/// Decode the registers of a slot back into a value.
///
/// Returns `None` if `words` is shorter than the type's width.
#[allow(clippy::cast_possible_wrap)]
pub fn decode(words: &[u16], data_type: DataType) -> Option<SensorValue> {
    match data_type {
        DataType::Bool => words.first().map(|w| SensorValue::Bool(*w != 0)),
        DataType::Int => words.first().map(|w| SensorValue::Int(i64::from(*w as i16))),
        DataType::Float => match words {
            [high, low, ..] => {
                let bits = (u32::from(*high) << 16) | u32::from(*low);
                Some(SensorValue::Float(f64::from(f32::from_bits(bits))))
            },
            _ => None,
        },
    }
}

/// The four Modbus data tables of one device.
///
/// Sensor values live in the holding registers; the other tables are
/// zero-filled and served read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding: Vec<u16>,
    input: Vec<u16>,
}

impl RegisterBank {
    /// Create a bank whose four tables each hold `size` entries.
    pub fn new(size: usize) -> Self {
        Self {
            coils: vec![false; size],
            discrete_inputs: vec![false; size],
            holding: vec![0; size],
            input: vec![0; size],
        }
    }

    /// Create a bank sized for a layout.
    pub fn for_layout(layout: &RegisterLayout) -> Self {
        Self::new(layout.bank_size())
    }

    /// Number of entries in each table.
    pub fn size(&self) -> usize {
        self.holding.len()
    }

    /// Read holding registers.
    pub fn holding(&self, start: u16, count: u16) -> Result<&[u16], RegisterError> {
        table_range(&self.holding, start, count)
    }

    /// Read input registers.
    pub fn input(&self, start: u16, count: u16) -> Result<&[u16], RegisterError> {
        table_range(&self.input, start, count)
    }

    /// Read coils.
    pub fn coils(&self, start: u16, count: u16) -> Result<&[bool], RegisterError> {
        table_range(&self.coils, start, count)
    }

    /// Read discrete inputs.
    pub fn discrete_inputs(&self, start: u16, count: u16) -> Result<&[bool], RegisterError> {
        table_range(&self.discrete_inputs, start, count)
    }

    /// Overwrite holding registers starting at `start`.
    pub fn write_holding(&mut self, start: u16, words: &[u16]) -> Result<(), RegisterError> {
        let count = u16::try_from(words.len()).unwrap_or(u16::MAX);
        let size = self.holding.len();
        let begin = usize::from(start);
        let target = self
            .holding
            .get_mut(begin..begin + words.len())
            .ok_or(RegisterError::IllegalAddress { start, count, size })?;
        target.copy_from_slice(words);
        Ok(())
    }

    /// Encode `value` into a slot's holding registers.
    pub fn write_slot(&mut self, slot: &RegisterSlot, value: SensorValue) -> Result<(), RegisterError> {
        self.write_holding(slot.start, &encode(value, slot.data_type))
    }
}

fn table_range<T>(table: &[T], start: u16, count: u16) -> Result<&[T], RegisterError> {
    let begin = usize::from(start);
    table
        .get(begin..begin + usize::from(count))
        .ok_or(RegisterError::IllegalAddress { start, count, size: table.len() })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sensor(id: SensorId, data_type: DataType) -> SensorDefinition {
        SensorDefinition::new(id, 1, format!("s{id}")).with_type(data_type)
    }

    #[test]
    fn auto_assignment_packs_in_definition_order() {
        let sensors =
            vec![sensor(1, DataType::Float), sensor(2, DataType::Int), sensor(3, DataType::Bool)];

        let layout = RegisterAllocator::allocate(&sensors).unwrap();

        let ranges: Vec<_> = layout.slots().iter().map(|s| (s.start, s.end())).collect();
        assert_eq!(ranges, vec![(0, 2), (2, 3), (3, 4)]);
        assert_eq!(layout.total_registers(), 4);
        assert_eq!(layout.bank_size(), 100);
    }

    #[test]
    fn explicit_address_leaves_gap_and_advances_cursor() {
        let sensors = vec![
            sensor(1, DataType::Int),
            sensor(2, DataType::Float).with_address(40),
            sensor(3, DataType::Bool),
        ];

        let layout = RegisterAllocator::allocate(&sensors).unwrap();

        assert_eq!(layout.slot(1).map(|s| s.start), Some(0));
        assert_eq!(layout.slot(2).map(|s| s.start), Some(40));
        assert_eq!(layout.slot(3).map(|s| s.start), Some(42));
        assert_eq!(layout.total_registers(), 43);
    }

    #[test]
    fn explicit_address_below_cursor_keeps_cursor() {
        let sensors = vec![
            sensor(1, DataType::Int).with_address(95),
            sensor(2, DataType::Int).with_address(3),
            sensor(3, DataType::Float),
        ];

        let layout = RegisterAllocator::allocate(&sensors).unwrap();

        assert_eq!(layout.slot(3).map(|s| s.start), Some(96));
        assert_eq!(layout.total_registers(), 98);
        assert_eq!(layout.bank_size(), 108);
    }

    #[test]
    fn overlapping_explicit_address_is_rejected() {
        let sensors = vec![sensor(1, DataType::Float), sensor(2, DataType::Int).with_address(1)];

        let result = RegisterAllocator::allocate(&sensors);
        assert_eq!(
            result,
            Err(RegisterError::Overlap { sensor: 2, other: 1, start: 1, end: 2 })
        );
    }

    #[test]
    fn auto_assignment_never_lands_on_explicit_range() {
        // The cursor jumps past explicit reservations, so only explicit
        // addresses can collide.
        let sensors = vec![sensor(1, DataType::Int).with_address(0), sensor(2, DataType::Float)];
        let layout = RegisterAllocator::allocate(&sensors).unwrap();
        assert_eq!(layout.slot(2).map(|s| s.start), Some(1));
    }

    #[test]
    fn range_past_address_space_is_rejected() {
        let sensors = vec![sensor(1, DataType::Float).with_address(u16::MAX)];
        assert!(matches!(
            RegisterAllocator::allocate(&sensors),
            Err(RegisterError::OutOfRange { sensor: 1, .. })
        ));
    }

    #[test]
    fn encode_int_clamps_to_i16_twos_complement() {
        assert_eq!(encode(SensorValue::Int(-1), DataType::Int), vec![0xFFFF]);
        assert_eq!(encode(SensorValue::Int(40_000), DataType::Int), vec![0x7FFF]);
        assert_eq!(encode(SensorValue::Int(-40_000), DataType::Int), vec![0x8000]);
    }

    #[test]
    fn encode_float_is_big_endian_high_word_first() {
        // 1.5f32 = 0x3FC0_0000
        assert_eq!(encode(SensorValue::Float(1.5), DataType::Float), vec![0x3FC0, 0x0000]);
        // -21.25f32 = 0xC1AA_0000
        assert_eq!(encode(SensorValue::Float(-21.25), DataType::Float), vec![0xC1AA, 0x0000]);
    }

    #[test]
    fn encode_bool_is_zero_or_one() {
        assert_eq!(encode(SensorValue::Bool(true), DataType::Bool), vec![1]);
        assert_eq!(encode(SensorValue::Bool(false), DataType::Bool), vec![0]);
    }

    #[test]
    fn decode_inverts_encoding() {
        assert_eq!(decode(&[0xFFFF], DataType::Int), Some(SensorValue::Int(-1)));
        assert_eq!(decode(&[0x3FC0, 0x0000], DataType::Float), Some(SensorValue::Float(1.5)));
        assert_eq!(decode(&[0x3FC0], DataType::Float), None);
    }

    #[test]
    fn bank_rejects_writes_past_end() {
        let mut bank = RegisterBank::new(100);
        assert!(bank.write_holding(98, &[1, 2]).is_ok());
        assert_eq!(
            bank.write_holding(99, &[1, 2]),
            Err(RegisterError::IllegalAddress { start: 99, count: 2, size: 100 })
        );
        assert_eq!(bank.holding(98, 2).unwrap(), &[1, 2]);
    }

    fn data_types() -> impl Strategy<Value = DataType> {
        prop_oneof![Just(DataType::Float), Just(DataType::Int), Just(DataType::Bool)]
    }

    proptest! {
        #[test]
        fn prop_auto_allocation_is_contiguous(types in proptest::collection::vec(data_types(), 0..64)) {
            let sensors: Vec<_> = types
                .iter()
                .enumerate()
                .map(|(i, t)| sensor(i as SensorId, *t))
                .collect();

            let layout = RegisterAllocator::allocate(&sensors).unwrap();

            let mut expected = 0u32;
            for slot in layout.slots() {
                prop_assert_eq!(u32::from(slot.start), expected);
                expected = slot.end();
            }
            let widths: u32 = types.iter().map(|t| u32::from(t.register_width())).sum();
            prop_assert_eq!(layout.total_registers(), widths);
            prop_assert!(layout.bank_size() >= MIN_BANK_SIZE);
        }
    }
}
