//! 📏 The Batch Calibrator: before the real import, write a sample at a few batch sizes
//! and keep the one the target bills least for, per record.
//!
//! Target writes are idempotent upserts, so the sample is real data: those records are
//! written again by the import loop and nobody can tell.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backends::TargetStore;
use crate::transforms::TransformedRecord;

pub const DEFAULT_CANDIDATES: [usize; 3] = [100, 50, 25];
pub const DEFAULT_SAMPLE_SIZE: usize = 100;
/// 🛟 Small enough that no store we've met throttles it, big enough to not be silly.
pub const SAFE_FALLBACK_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    pub candidates: Vec<usize>,
    pub sample_size: usize,
    pub fallback_batch_size: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.to_vec(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            fallback_batch_size: SAFE_FALLBACK_BATCH_SIZE,
        }
    }
}

/// ⏱️ One trial write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub batch_size: usize,
    pub records_written: usize,
    pub duration_ms: f64,
    pub request_charge: Option<f64>,
}

impl Measurement {
    pub fn cost_per_record(&self) -> Option<f64> {
        self.request_charge
            .map(|charge| charge / self.records_written.max(1) as f64)
    }

    pub fn duration_per_record_ms(&self) -> f64 {
        self.duration_ms / self.records_written.max(1) as f64
    }
}

/// 📋 How the importer will slice the collection. Computed once per import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPlan {
    pub batch_size: usize,
    pub estimated_cost_per_record: Option<f64>,
    pub calibrated: bool,
    pub measurements: Vec<Measurement>,
}

impl BatchPlan {
    /// A configured size; no measuring.
    pub fn fixed(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            estimated_cost_per_record: None,
            calibrated: false,
            measurements: Vec::new(),
        }
    }
}

/// 🔬 Measure every candidate against the first `sample_size` records and pick.
///
/// Never fails: any trouble during calibration means the safe fallback size.
pub async fn calibrate(
    target: &dyn TargetStore,
    target_collection: &str,
    records: &[TransformedRecord],
    settings: &CalibrationSettings,
) -> BatchPlan {
    let fallback = BatchPlan::fixed(settings.fallback_batch_size);
    let sample = &records[..records.len().min(settings.sample_size)];
    if sample.is_empty() || settings.candidates.is_empty() {
        return fallback;
    }

    let mut measurements = Vec::with_capacity(settings.candidates.len());
    for &candidate in &settings.candidates {
        let slice = &sample[..candidate.clamp(1, sample.len())];
        let started = Instant::now();
        match target.bulk_upsert(target_collection, slice).await {
            Ok(outcome) => {
                let measurement = Measurement {
                    batch_size: candidate,
                    records_written: slice.len(),
                    duration_ms: started.elapsed().as_secs_f64() * 1000.0,
                    request_charge: outcome.request_charge,
                };
                debug!(
                    collection = target_collection,
                    batch_size = candidate,
                    cost_per_record = measurement.cost_per_record(),
                    duration_per_record_ms = measurement.duration_per_record_ms(),
                    "📏 calibration sample"
                );
                measurements.push(measurement);
            }
            Err(err) => {
                warn!(
                    collection = target_collection,
                    batch_size = candidate,
                    error = %err,
                    fallback = settings.fallback_batch_size,
                    "📏 calibration write failed, falling back to the safe batch size"
                );
                return BatchPlan {
                    measurements,
                    ..fallback
                };
            }
        }
    }

    let Some(best) = pick(&measurements) else {
        return BatchPlan {
            measurements,
            ..fallback
        };
    };
    let plan = BatchPlan {
        batch_size: best.batch_size.max(1),
        estimated_cost_per_record: best.cost_per_record(),
        calibrated: true,
        measurements: measurements.clone(),
    };
    info!(
        collection = target_collection,
        batch_size = plan.batch_size,
        estimated_cost_per_record = plan.estimated_cost_per_record,
        "📏 calibrated batch size"
    );
    plan
}

/// Cheapest per record wins, faster per record breaks ties. If any sample came back
/// without a charge, cost isn't comparable and speed alone decides.
fn pick(measurements: &[Measurement]) -> Option<&Measurement> {
    let all_charged = measurements.iter().all(|m| m.request_charge.is_some());
    measurements.iter().min_by(|a, b| {
        let by_duration = a
            .duration_per_record_ms()
            .total_cmp(&b.duration_per_record_ms());
        if !all_charged {
            return by_duration;
        }
        let (ca, cb) = (
            a.cost_per_record().unwrap_or(f64::MAX),
            b.cost_per_record().unwrap_or(f64::MAX),
        );
        if (ca - cb).abs() <= f64::EPSILON * ca.abs().max(cb.abs()).max(1.0) {
            by_duration
        } else {
            ca.total_cmp(&cb)
        }
    })
}
