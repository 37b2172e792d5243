//! Gap-bounded imputation and glucose smoothing for 5-minute CGM datasets.
//!
//! The pipeline runs per (subject, split) partition: bounded forward/zero
//! fills, a resampled smoothing estimate aligned back onto the source grid,
//! and invalidation of the estimate across sustained glucose outages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fill;
pub mod frame;
pub mod gaps;
pub mod invalidate;
pub mod pipeline;
pub mod profile;
pub mod smooth;
pub mod sweep;
pub mod time;

pub use fill::{fill_bounded, FillClass, FillReport, FillRule};
pub use frame::Frame;
pub use gaps::{missing_runs, summarize, Gap, GapSummary};
pub use invalidate::invalidate_gaps;
pub use pipeline::{
    gap_profile, impute_file, impute_frame, DatasetReport, PartitionGaps, PartitionKey,
    PartitionReport,
};
pub use profile::{DatasetProfile, ProfileSet};
pub use smooth::{
    estimate_smoothed, GridSmoother, SmoothedSeries, SmoothingPrimitive, SmoothingStatus,
};
pub use sweep::{output_path_for, run_sweep, SkipReason, SweepConfig, SweepSummary};
pub use time::Timeline;

/// Samples per hour at the nominal 5-minute cadence.
pub const SAMPLES_PER_HOUR: usize = 12;

#[derive(Error, Debug)]
pub enum ImputeError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid timestamp '{value}' at row {row}")]
    InvalidTimestamp { row: usize, value: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("smoothing failed: {0}")]
    Smoothing(String),
    #[error("invalid profile: {0}")]
    Profile(String),
    #[error("source directory does not exist: {0}")]
    MissingDirectory(PathBuf),
}

impl ImputeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImputeError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Whether a literal zero is read as "no observation" before filling.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ZeroSentinel {
    pub forward_fill: bool,
    pub zero_fill: bool,
}

impl Default for ZeroSentinel {
    fn default() -> Self {
        Self {
            forward_fill: true,
            zero_fill: true,
        }
    }
}

/// Parameters of the default resampling smoother.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmootherParams {
    pub cadence_s: i64,
    pub median_window: usize,
    pub mean_window: usize,
    pub max_points: usize,
}

impl Default for SmootherParams {
    fn default() -> Self {
        Self {
            cadence_s: 300,
            median_window: 5,
            mean_window: 3,
            max_points: 2_000_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImputeParams {
    /// Longest run carried forward for biosignal columns (one hour).
    pub forward_fill_limit: usize,
    /// Longest run zero-filled for event/dose columns (one day).
    pub zero_fill_limit: usize,
    /// Fully-missing raw glucose window that invalidates the estimate (two hours).
    pub invalidation_window: usize,
    pub zero_as_missing: ZeroSentinel,
    pub smoothing: SmootherParams,
}

impl Default for ImputeParams {
    fn default() -> Self {
        Self {
            forward_fill_limit: SAMPLES_PER_HOUR,
            zero_fill_limit: 24 * SAMPLES_PER_HOUR,
            invalidation_window: 2 * SAMPLES_PER_HOUR,
            zero_as_missing: ZeroSentinel::default(),
            smoothing: SmootherParams::default(),
        }
    }
}

impl ImputeParams {
    pub fn validate(&self) -> Result<(), ImputeError> {
        if self.forward_fill_limit == 0 {
            return Err(ImputeError::InvalidParameter(
                "forward_fill_limit must be > 0".into(),
            ));
        }
        if self.zero_fill_limit == 0 {
            return Err(ImputeError::InvalidParameter(
                "zero_fill_limit must be > 0".into(),
            ));
        }
        if self.invalidation_window == 0 {
            return Err(ImputeError::InvalidParameter(
                "invalidation_window must be > 0".into(),
            ));
        }
        if self.smoothing.cadence_s <= 0 {
            return Err(ImputeError::InvalidParameter(
                "smoothing cadence must be > 0 seconds".into(),
            ));
        }
        if self.smoothing.median_window == 0 || self.smoothing.mean_window == 0 {
            return Err(ImputeError::InvalidParameter(
                "smoothing windows must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Rule applied to a column of the given fill class.
    pub fn rule_for(&self, class: FillClass) -> FillRule {
        match class {
            FillClass::ForwardFill => FillRule {
                class,
                max_run: self.forward_fill_limit,
                zero_is_missing: self.zero_as_missing.forward_fill,
            },
            FillClass::ZeroFill => FillRule {
                class,
                max_run: self.zero_fill_limit,
                zero_is_missing: self.zero_as_missing.zero_fill,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_five_minute_cadence() {
        let params = ImputeParams::default();
        assert_eq!(params.forward_fill_limit, 12);
        assert_eq!(params.zero_fill_limit, 288);
        assert_eq!(params.invalidation_window, 24);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_window_is_rejected() {
        let params = ImputeParams {
            invalidation_window: 0,
            ..ImputeParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ImputeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn json_errors_convert_to_serialization() {
        let err: ImputeError = serde_json::from_str::<ImputeParams>("[").unwrap_err().into();
        assert!(matches!(err, ImputeError::Serialization(_)));
    }

    #[test]
    fn partial_params_json_keeps_defaults() {
        let params: ImputeParams =
            serde_json::from_str(r#"{"forward_fill_limit": 6}"#).unwrap();
        assert_eq!(params.forward_fill_limit, 6);
        assert_eq!(params.zero_fill_limit, 288);
        assert_eq!(params.smoothing.cadence_s, 300);
    }
}
