//! Traffic generation: sensed values and demo device rosters.
//!
//! The simulation core treats measurements as opaque numbers; what they mean is up
//! to the [`MeasurementSource`] plugged into the driver.

use crate::clock::SimTime;
use crate::device::DeviceConfig;
use crate::radio::GeoPoint;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use std::collections::BTreeMap;

/// Source of the value a device reports when it is due to transmit.
pub trait MeasurementSource: Send {
    fn next_measurement(&mut self, device_id: u32, now: SimTime, rng: &mut dyn RngCore) -> f64;

    /// Forget any per-device history.
    fn reset(&mut self) {}
}

/// Always reports the same value and consumes no randomness.
#[derive(Debug, Clone, Copy)]
pub struct ConstantMeasurement(pub f64);

impl MeasurementSource for ConstantMeasurement {
    fn next_measurement(&mut self, _device_id: u32, _now: SimTime, _rng: &mut dyn RngCore) -> f64 {
        self.0
    }
}

/// Water level in centimeters: a Gaussian random walk with occasional rain surges.
#[derive(Debug, Clone)]
pub struct WaterLevelGenerator {
    base_level_cm: f64,
    initial_spread_cm: f64,
    rain_probability: f64,
    rain_rise_cm: (f64, f64),
    walk_sigma_cm: f64,
    last_levels: BTreeMap<u32, f64>,
}

impl WaterLevelGenerator {
    pub fn new() -> Self {
        Self {
            base_level_cm: 10.0,
            initial_spread_cm: 20.0,
            rain_probability: 0.1,
            rain_rise_cm: (5.0, 15.0),
            walk_sigma_cm: 2.0,
            last_levels: BTreeMap::new(),
        }
    }

    pub fn last_level(&self, device_id: u32) -> Option<f64> {
        self.last_levels.get(&device_id).copied()
    }
}

impl Default for WaterLevelGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementSource for WaterLevelGenerator {
    fn next_measurement(&mut self, device_id: u32, _now: SimTime, rng: &mut dyn RngCore) -> f64 {
        let level = match self.last_levels.get(&device_id) {
            None => rng.gen_range(self.base_level_cm..self.base_level_cm + self.initial_spread_cm),
            Some(&previous) => {
                let z: f64 = StandardNormal.sample(rng);
                let mut change = z * self.walk_sigma_cm;
                if rng.gen_bool(self.rain_probability) {
                    change += rng.gen_range(self.rain_rise_cm.0..self.rain_rise_cm.1);
                }
                (previous + change).max(0.0)
            }
        };
        self.last_levels.insert(device_id, level);
        level
    }

    fn reset(&mut self) {
        self.last_levels.clear();
    }
}

/// Named deployment area.
#[derive(Debug, Clone, Copy)]
pub struct Area {
    pub name: &'static str,
    pub center: GeoPoint,
}

pub const DHAKA_AREAS: [Area; 7] = [
    Area { name: "Bashundhara R/A", center: GeoPoint::new(23.8170, 90.4270) },
    Area { name: "Dhanmondi", center: GeoPoint::new(23.7465, 90.3710) },
    Area { name: "Uttara", center: GeoPoint::new(23.8750, 90.3900) },
    Area { name: "Gulshan", center: GeoPoint::new(23.7900, 90.4100) },
    Area { name: "Banani", center: GeoPoint::new(23.7940, 90.4050) },
    Area { name: "Wari", center: GeoPoint::new(23.7100, 90.4000) },
    Area { name: "Motijheel", center: GeoPoint::new(23.7300, 90.4200) },
];

const AREA_JITTER_DEG: f64 = 0.005; // ~500 m
const TX_POWER_LEVELS_DBM: [f64; 5] = [2.0, 5.0, 8.0, 11.0, 14.0];

/// Spreading factor candidates by distance band: close devices use fast SFs.
fn sf_candidates(distance_m: f64) -> &'static [u8] {
    if distance_m < 5_000.0 {
        &[7, 8, 9]
    } else if distance_m < 15_000.0 {
        &[9, 10, 11]
    } else {
        &[10, 11, 12]
    }
}

/// Scatter `count` sensors round-robin over `areas`, with ids `1..=count` and a
/// random phase within `interval_ms`.
pub fn demo_roster<R: Rng + ?Sized>(
    count: usize,
    areas: &[Area],
    gateway: &GeoPoint,
    interval_ms: u64,
    rng: &mut R,
) -> Vec<DeviceConfig> {
    if areas.is_empty() {
        return Vec::new();
    }
    let mut per_area = vec![0usize; areas.len()];
    (0..count)
        .map(|index| {
            let area_index = index % areas.len();
            let area = &areas[area_index];
            per_area[area_index] += 1;

            let location = GeoPoint::new(
                area.center.latitude + rng.gen_range(-AREA_JITTER_DEG..AREA_JITTER_DEG),
                area.center.longitude + rng.gen_range(-AREA_JITTER_DEG..AREA_JITTER_DEG),
            );
            let distance_m = location.distance_m(gateway);
            let spreading_factor = *sf_candidates(distance_m).choose(&mut *rng).unwrap_or(&12);
            let tx_power_dbm = *TX_POWER_LEVELS_DBM.choose(&mut *rng).unwrap_or(&14.0);

            DeviceConfig {
                id: index as u32 + 1,
                name: format!("{} Sensor {}", area.name, per_area[area_index]),
                location,
                spreading_factor,
                tx_power_dbm,
                interval_ms: Some(interval_ms),
                phase_ms: rng.gen_range(0..interval_ms.max(1)),
                max_messages: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MS_PER_MINUTE;
    use crate::device::Device;
    use crate::duty_cycle::DutyCycleConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const GATEWAY: GeoPoint = GeoPoint::new(23.8103, 90.4125);

    #[test]
    fn test_water_level_never_negative_and_continuous() {
        let mut generator = WaterLevelGenerator::new();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let first = generator.next_measurement(1, 0, &mut rng);
        assert!((10.0..30.0).contains(&first));
        for step in 1..500 {
            let level = generator.next_measurement(1, step, &mut rng);
            assert!(level >= 0.0);
        }
        assert!(generator.last_level(1).is_some());
        generator.reset();
        assert!(generator.last_level(1).is_none());
    }

    #[test]
    fn test_demo_roster_is_valid_and_reproducible() {
        let interval = 5 * MS_PER_MINUTE;
        let roster = demo_roster(20, &DHAKA_AREAS, &GATEWAY, interval, &mut ChaCha8Rng::seed_from_u64(9));
        let again = demo_roster(20, &DHAKA_AREAS, &GATEWAY, interval, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(roster, again);
        assert_eq!(roster.len(), 20);
        assert_eq!(roster[0].name, "Bashundhara R/A Sensor 1");
        assert_eq!(roster[7].name, "Bashundhara R/A Sensor 2");

        for config in &roster {
            let device = Device::from_config(config, &GATEWAY, interval, DutyCycleConfig::default()).unwrap();
            assert!(sf_candidates(device.distance_m).contains(&config.spreading_factor));
        }
    }
}
