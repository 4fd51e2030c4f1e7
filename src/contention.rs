use crate::outcome::TransmissionAttempt;
use crate::radio::SpreadingFactor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

/// Half-open airtime intervals `[start, end)` on the same spreading factor overlap.
/// Different spreading factors are treated as orthogonal.
pub fn overlaps(a: &TransmissionAttempt, b: &TransmissionAttempt) -> bool {
    a.spreading_factor == b.spreading_factor && a.timestamp_ms < b.end_ms() && b.timestamp_ms < a.end_ms()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentionSummary {
    pub on_air: usize,
    pub collided: usize,
}

/// Marks collisions across one step's batch of attempts.
#[derive(Debug, Default)]
pub struct ContentionResolver;

impl ContentionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Sets `collided` on every on-air attempt that overlaps at least one other
    /// on-air attempt with the same spreading factor. Attempts blocked by duty
    /// cycle never reached the channel and are left untouched.
    pub fn resolve(&self, batch: &mut [TransmissionAttempt]) -> ContentionSummary {
        let mut groups: BTreeMap<SpreadingFactor, Vec<usize>> = BTreeMap::new();
        for (index, attempt) in batch.iter_mut().enumerate() {
            attempt.collided = false;
            if attempt.on_air() {
                groups.entry(attempt.spreading_factor).or_default().push(index);
            }
        }

        let mut summary = ContentionSummary::default();
        for (sf, mut members) in groups {
            summary.on_air += members.len();
            members.sort_by_key(|&index| (batch[index].timestamp_ms, index));

            for (position, &current) in members.iter().enumerate() {
                let current_end = batch[current].end_ms();
                // sorted by start: stop at the first attempt starting after we end
                for &later in &members[position + 1..] {
                    if batch[later].timestamp_ms >= current_end {
                        break;
                    }
                    batch[current].collided = true;
                    batch[later].collided = true;
                    trace!(
                        "{} collision between device {} and device {}",
                        sf,
                        batch[current].device_id,
                        batch[later].device_id
                    );
                }
            }
        }

        summary.collided = batch.iter().filter(|attempt| attempt.collided).count();
        summary
    }
}
