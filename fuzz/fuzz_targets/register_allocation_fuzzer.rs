//! Fuzz target for register allocation
//!
//! # Strategy
//!
//! - Arbitrary mixes of FLOAT/INT/BOOL sensors
//! - Explicit addresses anywhere in the 16-bit space, including the top
//!   registers where a FLOAT would run past the end
//!
//! # Invariants
//!
//! - NEVER panic
//! - A successful layout has one slot per sensor, in input order
//! - Slots never overlap and never run past 65536
//! - Sensors without an explicit address never start below the end of the
//!   previous slot
//! - The register bank always covers every slot

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use plcsim_core::{DataType, RegisterAllocator, RegisterBank, SensorDefinition, SensorValue};

#[derive(Debug, Arbitrary)]
enum FuzzType {
    Float,
    Int,
    Bool,
}

#[derive(Debug, Arbitrary)]
struct FuzzSensor {
    data_type: FuzzType,
    address: Option<u16>,
}

fuzz_target!(|sensors: Vec<FuzzSensor>| {
    let definitions: Vec<SensorDefinition> = sensors
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let data_type = match s.data_type {
                FuzzType::Float => DataType::Float,
                FuzzType::Int => DataType::Int,
                FuzzType::Bool => DataType::Bool,
            };
            let sensor = SensorDefinition::new(i as u64, 1, format!("s{i}")).with_type(data_type);
            match s.address {
                Some(address) => sensor.with_address(address),
                None => sensor,
            }
        })
        .collect();

    let Ok(layout) = RegisterAllocator::allocate(&definitions) else {
        return;
    };

    let slots = layout.slots();
    assert_eq!(slots.len(), definitions.len());

    let mut furthest = 0u32;
    for (i, (slot, sensor)) in slots.iter().zip(&definitions).enumerate() {
        assert_eq!(slot.sensor, sensor.id);
        assert_eq!(slot.width, sensor.data_type.register_width());
        assert!(slot.end() <= 65536);

        if sensor.address.is_none() {
            assert!(u32::from(slot.start) >= furthest, "auto slot {i} below cursor");
        }
        furthest = furthest.max(slot.end());

        for other in &slots[..i] {
            assert!(slot.end() <= u32::from(other.start) || other.end() <= u32::from(slot.start));
        }
    }
    assert_eq!(layout.total_registers(), furthest);

    let mut bank = RegisterBank::for_layout(&layout);
    for slot in slots {
        assert!(bank.write_slot(slot, SensorValue::Float(1.0)).is_ok());
    }
});
