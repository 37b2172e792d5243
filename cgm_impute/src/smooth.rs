//! Smoothing estimator: run a smoothing primitive over the valid glucose
//! samples of a partition, reconcile its timestamps with the partition's
//! timezone awareness and map it back onto the partition's own rows.

use chrono::DateTime;
use ndarray::{s, Array1};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::time::{utc_offset, Timeline};
use crate::{ImputeError, SmootherParams};

/// Resampled output of a smoothing primitive.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedSeries {
    pub times: Timeline,
    pub values: Vec<f64>,
}

/// Curve-fitting capability consumed by the estimator. Implementations
/// must be deterministic for a given input. The returned timeline may use
/// any timezone awareness; the estimator reconciles it.
pub trait SmoothingPrimitive: Send + Sync {
    fn name(&self) -> &str;

    fn smooth(&self, times: &Timeline, values: &[f64]) -> Result<SmoothedSeries, ImputeError>;
}

/// Default primitive: linear resampling onto a fixed cadence starting at
/// the first sample, a centered rolling median, then a centered rolling
/// mean. Output timestamps are UTC offset-aware.
#[derive(Clone, Debug, Default)]
pub struct GridSmoother {
    params: SmootherParams,
}

impl GridSmoother {
    pub fn new(params: SmootherParams) -> Self {
        Self { params }
    }
}

impl SmoothingPrimitive for GridSmoother {
    fn name(&self) -> &str {
        "grid-median-mean"
    }

    fn smooth(&self, times: &Timeline, values: &[f64]) -> Result<SmoothedSeries, ImputeError> {
        if times.len() != values.len() {
            return Err(ImputeError::Smoothing(format!(
                "{} timestamps for {} values",
                times.len(),
                values.len()
            )));
        }
        if self.params.cadence_s <= 0 {
            return Err(ImputeError::InvalidParameter(
                "smoothing cadence must be > 0 seconds".into(),
            ));
        }

        let mut points: Vec<(i64, f64)> = times
            .instants()
            .into_iter()
            .zip(values.iter().copied())
            .filter(|(_, v)| v.is_finite())
            .collect();
        points.sort_by_key(|p| p.0);
        points.dedup_by_key(|p| p.0);
        if points.is_empty() {
            return Ok(SmoothedSeries {
                times: Timeline::Aware(Vec::new()),
                values: Vec::new(),
            });
        }

        let (grid, resampled) =
            resample_grid(&points, self.params.cadence_s, self.params.max_points)?;
        let median = smooth_median(&resampled, self.params.median_window);
        let smoothed = smooth_mean(&median, self.params.mean_window);

        let mut stamps = Vec::with_capacity(grid.len());
        for secs in grid {
            let utc = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                ImputeError::Smoothing(format!("grid instant {} out of range", secs))
            })?;
            stamps.push(utc.with_timezone(&utc_offset()));
        }

        Ok(SmoothedSeries {
            times: Timeline::Aware(stamps),
            values: smoothed.to_vec(),
        })
    }
}

fn resample_grid(
    points: &[(i64, f64)],
    cadence_s: i64,
    max_points: usize,
) -> Result<(Vec<i64>, Vec<f64>), ImputeError> {
    let start = points[0].0;
    let end = points[points.len() - 1].0;
    let len = ((end - start) / cadence_s) as usize + 1;
    if len > max_points {
        return Err(ImputeError::Smoothing(format!(
            "resampled grid would hold {} points (max {})",
            len, max_points
        )));
    }
    let mut times = Vec::with_capacity(len);
    let mut out = Vec::with_capacity(len);
    let mut idx = 0;
    for step in 0..len {
        let target = start + step as i64 * cadence_s;
        while idx + 1 < points.len() && points[idx + 1].0 <= target {
            idx += 1;
        }
        let (t0, v0) = points[idx];
        if idx + 1 < points.len() {
            let (t1, v1) = points[idx + 1];
            let frac = if t1 > t0 {
                ((target - t0) as f64 / (t1 - t0) as f64).clamp(0.0, 1.0)
            } else {
                0.0
            };
            out.push(v0 + (v1 - v0) * frac);
        } else {
            out.push(v0);
        }
        times.push(target);
    }
    Ok((times, out))
}

fn smooth_median(data: &[f64], window: usize) -> Array1<f64> {
    if window <= 1 {
        return Array1::from_vec(data.to_vec());
    }
    let radius = window / 2;
    let mut out = Vec::with_capacity(data.len());
    for i in 0..data.len() {
        let start = i.saturating_sub(radius);
        let end = (i + radius + 1).min(data.len());
        let mut slice = data[start..end].to_vec();
        slice.sort_by_key(|v| OrderedFloat(*v));
        let median = if slice.len() % 2 == 0 {
            let mid = slice.len() / 2;
            (slice[mid - 1] + slice[mid]) / 2.0
        } else {
            slice[slice.len() / 2]
        };
        out.push(median);
    }
    Array1::from_vec(out)
}

fn smooth_mean(data: &Array1<f64>, window: usize) -> Array1<f64> {
    if window <= 1 || data.is_empty() {
        return data.clone();
    }
    let radius = window / 2;
    let n = data.len();
    Array1::from_shape_fn(n, |i| {
        let start = i.saturating_sub(radius);
        let end = (i + radius + 1).min(n);
        data.slice(s![start..end]).mean().unwrap_or(data[i])
    })
}

/// Outcome of smoothing one partition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SmoothingStatus {
    Smoothed { input_samples: usize, output_samples: usize },
    /// No valid glucose sample in the partition.
    SkippedNoData,
    Failed { reason: String },
    /// Valid input produced an entirely missing aligned column.
    AlignmentFailed,
}

impl SmoothingStatus {
    pub fn is_alignment_failure(&self) -> bool {
        matches!(self, SmoothingStatus::AlignmentFailed)
    }
}

/// Smooth `glucose` (on `timeline`, partition time order) and return one
/// estimate per row, or `None` where no estimate exists.
pub fn estimate_smoothed(
    timeline: &Timeline,
    glucose: &[Option<f64>],
    primitive: &dyn SmoothingPrimitive,
) -> (Vec<Option<f64>>, SmoothingStatus) {
    let n = glucose.len();
    let valid_rows: Vec<usize> = glucose
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|_| i))
        .collect();
    if valid_rows.is_empty() {
        return (vec![None; n], SmoothingStatus::SkippedNoData);
    }

    let input_times = timeline.select(&valid_rows);
    let input_values: Vec<f64> = valid_rows
        .iter()
        .filter_map(|&i| glucose[i])
        .collect();

    let series = match primitive.smooth(&input_times, &input_values) {
        Ok(series) => series,
        Err(err) => {
            return (
                vec![None; n],
                SmoothingStatus::Failed {
                    reason: err.to_string(),
                },
            )
        }
    };
    if series.times.len() != series.values.len() {
        return (
            vec![None; n],
            SmoothingStatus::Failed {
                reason: format!(
                    "{} returned {} timestamps for {} values",
                    primitive.name(),
                    series.times.len(),
                    series.values.len()
                ),
            },
        );
    }

    let output_samples = series.values.len();
    let reconciled = series.times.reconcile_to(timeline);
    let aligned = align_nearest(&reconciled.instants(), &series.values, &timeline.instants());
    if aligned.iter().all(Option::is_none) {
        return (aligned, SmoothingStatus::AlignmentFailed);
    }
    (
        aligned,
        SmoothingStatus::Smoothed {
            input_samples: valid_rows.len(),
            output_samples,
        },
    )
}

/// Nearest-neighbor join of `(source_keys, source_values)` onto
/// `target_keys`. Non-finite source values are ignored. When two source
/// samples are equally near, the earlier one wins.
pub fn align_nearest(source_keys: &[i64], source_values: &[f64], target_keys: &[i64]) -> Vec<Option<f64>> {
    let mut source: Vec<(i64, f64)> = source_keys
        .iter()
        .copied()
        .zip(source_values.iter().copied())
        .filter(|(_, v)| v.is_finite())
        .collect();
    source.sort_by_key(|p| p.0);
    if source.is_empty() {
        return vec![None; target_keys.len()];
    }

    target_keys
        .iter()
        .map(|&t| {
            let pos = source.partition_point(|p| p.0 < t);
            let before = pos.checked_sub(1).map(|i| source[i]);
            let after = source.get(pos).copied();
            let pick = match (before, after) {
                (Some(b), Some(a)) => {
                    if (t - b.0) <= (a.0 - t) {
                        b
                    } else {
                        a
                    }
                }
                (Some(b), None) => b,
                (None, Some(a)) => a,
                (None, None) => return None,
            };
            Some(pick.1)
        })
        .collect()
}
