//! Live state of one sensor inside a running simulator.

use plcsim_core::{Environment, SensorDefinition, SensorValue, ValueGenerator};

/// Pairs a sensor definition with its generator and last computed value.
///
/// Owned by exactly one simulator. The generator is reset every time the
/// simulator starts, the last value survives until the next update.
#[derive(Debug)]
pub struct SensorRuntime<E>
where
    E: Environment,
{
    definition: SensorDefinition,
    generator: ValueGenerator<E>,
    current: Option<SensorValue>,
}

impl<E> SensorRuntime<E>
where
    E: Environment,
{
    /// Create the runtime for a sensor. No value is computed yet.
    pub fn new(definition: SensorDefinition, env: E) -> Self {
        let generator = ValueGenerator::for_sensor(&definition, env);
        Self { definition, generator, current: None }
    }

    /// Sensor this runtime simulates.
    pub fn definition(&self) -> &SensorDefinition {
        &self.definition
    }

    /// Last computed value, `None` until the simulator first starts.
    pub fn current(&self) -> Option<SensorValue> {
        self.current
    }

    /// Compute, record, and return the next value.
    pub fn update(&mut self) -> SensorValue {
        let value = self.generator.value();
        self.current = Some(value);
        value
    }

    /// Restart the generator clocks.
    pub fn reset(&mut self) {
        self.generator.reset();
    }
}
