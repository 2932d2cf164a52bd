use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::MAX_SENSOR_VALUE;

/// Source of this node's own readings.
pub trait SensorSource: Send {
    /// Take one reading, `0..=99`.
    fn sample(&mut self) -> u8;
}

impl<F> SensorSource for F
where
    F: FnMut() -> u8 + Send,
{
    fn sample(&mut self) -> u8 {
        self()
    }
}

/// Uniform readings in `1..=99`, for nodes without real hardware.
pub struct RandomSensor {
    rng: StdRng,
}

impl RandomSensor {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for RandomSensor {
    fn sample(&mut self) -> u8 {
        self.rng.random_range(1..=MAX_SENSOR_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_sensor_stays_in_range() {
        let mut sensor = RandomSensor::seeded(7);
        for _ in 0..1000 {
            let v = sensor.sample();
            assert!((1..=99).contains(&v));
        }
    }

    #[test]
    fn closures_are_sources() {
        let mut next = 0u8;
        let mut ramp = move || {
            next += 1;
            next
        };
        assert_eq!(SensorSource::sample(&mut ramp), 1);
        assert_eq!(SensorSource::sample(&mut ramp), 2);
    }
}
