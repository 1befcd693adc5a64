//! Per-sensor waveform generation.
//!
//! A [`ValueGenerator`] turns a sensor's simulation rule into a sequence of
//! typed values driven by the [`Environment`] clock. Elapsed time is measured
//! from construction or the last [`ValueGenerator::reset`].
//!
//! | Kind | Raw value |
//! |------|-----------|
//! | CONSTANT | `initial` |
//! | RANDOM | uniform in `[min, max]` per call |
//! | SINE | `min + (sin(2π·t/10) + 1) / 2 · (max − min)` |
//! | STEP | `initial`, then a fresh uniform sample every 2 s |
//! | RAMP | triangular wave at `(max − min) / 20` per second |
//!
//! The raw value is then coerced to the sensor's [`DataType`]: BOOL is
//! `raw > (min + max) / 2`, INT rounds half away from zero, FLOAT rounds to
//! two decimals.
//!
//! Generators are not synchronized. One update loop owns each instance and
//! calls [`ValueGenerator::value`] through `&mut self`.

use std::{
    f64::consts::PI,
    time::{Duration, Instant},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    env::Environment,
    sensor::{DataType, SensorDefinition, SensorValue, SimulationKind},
};

/// Period of the SINE waveform.
pub const SINE_PERIOD: Duration = Duration::from_secs(10);

/// Hold window of the STEP waveform.
pub const STEP_INTERVAL: Duration = Duration::from_secs(2);

/// Time for RAMP to cross the full range once.
pub const RAMP_TRAVERSE: Duration = Duration::from_secs(20);

/// Stateful generator for one sensor.
pub struct ValueGenerator<E>
where
    E: Environment,
{
    kind: SimulationKind,
    data_type: DataType,
    min: f64,
    max: f64,
    initial: f64,
    env: E,
    rng: StdRng,
    started_at: Instant,
    last_step_at: Instant,
    held: f64,
}

impl<E> ValueGenerator<E>
where
    E: Environment,
{
    /// Create a generator whose clocks start now.
    ///
    /// The sampling RNG is seeded from `env`, so a seeded environment gives a
    /// reproducible sequence.
    pub fn new(
        kind: SimulationKind,
        data_type: DataType,
        min: f64,
        max: f64,
        initial: f64,
        env: E,
    ) -> Self {
        let now = env.now();
        let rng = StdRng::seed_from_u64(env.random_u64());
        Self {
            kind,
            data_type,
            min,
            max,
            initial,
            env,
            rng,
            started_at: now,
            last_step_at: now,
            held: initial,
        }
    }

    /// Create a generator for a sensor definition.
    pub fn for_sensor(sensor: &SensorDefinition, env: E) -> Self {
        Self::new(sensor.simulation, sensor.data_type, sensor.min, sensor.max, sensor.initial, env)
    }

    /// Simulation rule of this generator.
    pub fn kind(&self) -> SimulationKind {
        self.kind
    }

    /// Next value in the sequence, coerced to the declared data type.
    pub fn value(&mut self) -> SensorValue {
        let raw = self.raw_value();
        self.coerce(raw)
    }

    /// Restart every clock at "now" and restore the held value to `initial`.
    pub fn reset(&mut self) {
        let now = self.env.now();
        self.started_at = now;
        self.last_step_at = now;
        self.held = self.initial;
    }

    fn raw_value(&mut self) -> f64 {
        match self.kind {
            SimulationKind::Constant => self.initial,
            SimulationKind::Random => self.sample(),
            SimulationKind::Sine => self.sine(),
            SimulationKind::Step => self.step(),
            SimulationKind::Ramp => self.ramp(),
        }
    }

    fn elapsed(&self) -> f64 {
        self.env.now().saturating_duration_since(self.started_at).as_secs_f64()
    }

    fn sample(&mut self) -> f64 {
        let (lo, hi) = (self.min.min(self.max), self.min.max(self.max));
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    fn sine(&self) -> f64 {
        let phase = 2.0 * PI * self.elapsed() / SINE_PERIOD.as_secs_f64();
        let normalized = (phase.sin() + 1.0) / 2.0;
        self.min + normalized * (self.max - self.min)
    }

    fn step(&mut self) -> f64 {
        let now = self.env.now();
        if now.saturating_duration_since(self.last_step_at) >= STEP_INTERVAL {
            self.held = self.sample();
            self.last_step_at = now;
        }
        self.held
    }

    fn ramp(&self) -> f64 {
        let range = self.max - self.min;
        if range <= 0.0 {
            return self.min;
        }
        let rate = range / RAMP_TRAVERSE.as_secs_f64();
        let position = (self.elapsed() * rate) % (2.0 * range);

        if position <= range {
            // ascending
            self.min + position
        } else {
            self.max - (position - range)
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn coerce(&self, raw: f64) -> SensorValue {
        match self.data_type {
            DataType::Bool => SensorValue::Bool(raw > (self.min + self.max) / 2.0),
            // `as` saturates at the i64 bounds
            DataType::Int => SensorValue::Int(raw.round() as i64),
            DataType::Float => SensorValue::Float((raw * 100.0).round() / 100.0),
        }
    }
}

impl<E> std::fmt::Debug for ValueGenerator<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueGenerator")
            .field("kind", &self.kind)
            .field("data_type", &self.data_type)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}
