//! Per-subject/split orchestration.
//!
//! Rows are grouped by subject and train/test flag; every group is filled,
//! smoothed and invalidated on its own and the results are written back to
//! the group's original rows. Nothing computed for one group is visible to
//! another.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::fill::{fill_bounded, FillClass, FillReport, FillRule};
use crate::frame::{parse_flag, Frame};
use crate::gaps::{summarize, GapSummary};
use crate::invalidate::invalidate_gaps;
use crate::profile::DatasetProfile;
use crate::smooth::{estimate_smoothed, SmoothingPrimitive, SmoothingStatus};
use crate::time::Timeline;
use crate::{ImputeError, ImputeParams};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub subject: String,
    pub is_test: bool,
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let split = if self.is_test { "test" } else { "train" };
        write!(f, "{}/{}", self.subject, split)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PartitionReport {
    pub subject: String,
    pub is_test: bool,
    pub rows: usize,
    pub duplicate_timestamps: usize,
    pub fills: BTreeMap<String, FillReport>,
    pub smoothing: SmoothingStatus,
    /// Smoothed samples cleared by gap invalidation.
    pub invalidated: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetReport {
    pub dataset: String,
    pub rows: usize,
    pub smoother: String,
    /// SHA-256 of the effective profile and params.
    pub config_hash: String,
    /// Classified columns absent from the file.
    pub absent_columns: Vec<String>,
    /// Classified columns present but not numeric; passed through unchanged.
    pub unreadable_columns: Vec<String>,
    pub alignment_failures: usize,
    pub partitions: Vec<PartitionReport>,
}

impl DatasetReport {
    pub fn totals(&self) -> BTreeMap<String, FillReport> {
        let mut totals: BTreeMap<String, FillReport> = BTreeMap::new();
        for partition in &self.partitions {
            for (column, report) in &partition.fills {
                totals.entry(column.clone()).or_default().merge(report);
            }
        }
        totals
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ImputeError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|e| ImputeError::io(path, e))
    }
}

struct FillColumn {
    index: usize,
    name: String,
    rule: FillRule,
    values: Vec<Option<f64>>,
}

struct PartitionInput {
    key: PartitionKey,
    rows: Vec<usize>,
    duplicate_timestamps: usize,
    timeline: Timeline,
    glucose: Vec<Option<f64>>,
    columns: Vec<Vec<Option<f64>>>,
}

struct PartitionOutput {
    rows: Vec<usize>,
    columns: Vec<Vec<Option<f64>>>,
    smoothed: Vec<Option<f64>>,
    report: PartitionReport,
}

fn require(frame: &Frame, name: &str) -> Result<usize, ImputeError> {
    frame
        .column_index(name)
        .ok_or_else(|| ImputeError::SchemaMismatch(format!("missing required column '{}'", name)))
}

fn config_hash(profile: &DatasetProfile, params: &ImputeParams) -> Result<String, ImputeError> {
    let bytes = serde_json::to_vec(&(profile, params))?;
    Ok(sha256_hex(&bytes))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Group row indices by (subject, split) in order of first appearance, each
/// group sorted by time. Returns the groups and their duplicate-timestamp
/// counts.
fn partition_rows(
    subjects: &[String],
    splits: &[bool],
    instants: &[i64],
) -> Vec<(PartitionKey, Vec<usize>, usize)> {
    let mut order: Vec<(PartitionKey, Vec<usize>)> = Vec::new();
    let mut slots: HashMap<PartitionKey, usize> = HashMap::new();
    for (row, (subject, &is_test)) in subjects.iter().zip(splits).enumerate() {
        let key = PartitionKey {
            subject: subject.clone(),
            is_test,
        };
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            order.push((key, Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(row);
    }
    order
        .into_iter()
        .map(|(key, mut rows)| {
            rows.sort_by_key(|&r| instants[r]);
            let duplicates = rows
                .windows(2)
                .filter(|w| instants[w[0]] == instants[w[1]])
                .count();
            (key, rows, duplicates)
        })
        .collect()
}

fn process_partition(
    input: PartitionInput,
    fill_columns: &[FillColumn],
    glucose_slot: Option<usize>,
    invalidation_window: usize,
    primitive: &dyn SmoothingPrimitive,
) -> PartitionOutput {
    let PartitionInput {
        key,
        rows,
        duplicate_timestamps,
        timeline,
        glucose: raw_glucose,
        mut columns,
    } = input;

    let mut fills = BTreeMap::new();
    for (meta, values) in fill_columns.iter().zip(columns.iter_mut()) {
        let report = fill_bounded(values, &meta.rule);
        debug!(
            "{} {}: {} filled, {} left missing, {} zero sentinels",
            key, meta.name, report.filled, report.left_missing, report.sentinel_zeros
        );
        fills.insert(meta.name.clone(), report);
    }

    let glucose = match glucose_slot {
        Some(slot) => columns[slot].as_slice(),
        None => raw_glucose.as_slice(),
    };
    let (mut smoothed, smoothing) = estimate_smoothed(&timeline, glucose, primitive);
    match &smoothing {
        SmoothingStatus::SkippedNoData => {
            info!("{}: no valid glucose, smoothing skipped", key)
        }
        SmoothingStatus::Failed { reason } => warn!("{}: smoothing failed: {}", key, reason),
        SmoothingStatus::AlignmentFailed => error!(
            "{}: smoothed glucose is entirely missing after alignment ({} rows)",
            key,
            rows.len()
        ),
        SmoothingStatus::Smoothed { .. } => {}
    }
    let invalidated = invalidate_gaps(&raw_glucose, &mut smoothed, invalidation_window);

    PartitionOutput {
        report: PartitionReport {
            subject: key.subject,
            is_test: key.is_test,
            rows: rows.len(),
            duplicate_timestamps,
            fills,
            smoothing,
            invalidated,
        },
        rows,
        columns,
        smoothed,
    }
}

/// Gap statistics of one partition, keyed by column name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PartitionGaps {
    pub key: PartitionKey,
    pub columns: BTreeMap<String, GapSummary>,
}

struct Structure {
    timeline: Timeline,
    subjects: Vec<String>,
    splits: Vec<bool>,
}

fn read_structure(frame: &Frame, profile: &DatasetProfile) -> Result<Structure, ImputeError> {
    let time_col = require(frame, &profile.time_column)?;
    let subject_col = require(frame, &profile.subject_column)?;
    let split_col = require(frame, &profile.split_column)?;

    let time_cells = frame.strings(time_col);
    let timeline = Timeline::parse(time_cells.iter().map(String::as_str))?;
    let splits = frame
        .strings(split_col)
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            parse_flag(cell).ok_or_else(|| {
                ImputeError::SchemaMismatch(format!(
                    "column '{}' row {}: '{}' is not a boolean",
                    profile.split_column, row, cell
                ))
            })
        })
        .collect::<Result<Vec<bool>, _>>()?;
    Ok(Structure {
        timeline,
        subjects: frame.strings(subject_col),
        splits,
    })
}

/// Raw gap statistics per partition for the glucose column and every
/// classified column present. Glucose counts gaps long enough to be
/// invalidated; fill columns count gaps longer than their fill limit.
pub fn gap_profile(
    frame: &Frame,
    profile: &DatasetProfile,
    params: &ImputeParams,
) -> Result<Vec<PartitionGaps>, ImputeError> {
    let params = profile.effective_params(params);
    let structure = read_structure(frame, profile)?;
    let glucose_col = require(frame, &profile.glucose_column)?;

    let mut columns = vec![(
        profile.glucose_column.clone(),
        params.invalidation_window.saturating_sub(1),
        frame.numeric_values(glucose_col)?,
    )];
    for (name, class) in profile.classified_columns() {
        let Some(index) = frame.column_index(name) else {
            continue;
        };
        let limit = match class {
            FillClass::ForwardFill => params.forward_fill_limit,
            FillClass::ZeroFill => params.zero_fill_limit,
        };
        match frame.numeric_values(index) {
            Ok(values) => columns.push((name.to_string(), limit, values)),
            Err(err) => warn!("not profiling column '{}': {}", name, err),
        }
    }

    let instants = structure.timeline.instants();
    Ok(
        partition_rows(&structure.subjects, &structure.splits, &instants)
            .into_iter()
            .map(|(key, rows, _)| {
                let columns = columns
                    .iter()
                    .map(|(name, limit, values)| {
                        let picked: Vec<Option<f64>> = rows.iter().map(|&r| values[r]).collect();
                        (name.clone(), summarize(&picked, *limit))
                    })
                    .collect();
                PartitionGaps { key, columns }
            })
            .collect(),
    )
}

/// Impute `frame` in place: fill the classified columns and add (or
/// recompute) the smoothed glucose column. Row order is unchanged.
pub fn impute_frame(
    frame: &mut Frame,
    profile: &DatasetProfile,
    params: &ImputeParams,
    primitive: &dyn SmoothingPrimitive,
) -> Result<DatasetReport, ImputeError> {
    profile.validate()?;
    let params = profile.effective_params(params);
    params.validate()?;

    let Structure {
        timeline,
        subjects,
        splits,
    } = read_structure(frame, profile)?;
    let instants = timeline.instants();
    let glucose_col = require(frame, &profile.glucose_column)?;
    let glucose = frame.numeric_values(glucose_col)?;

    let mut report = DatasetReport {
        rows: frame.len(),
        smoother: primitive.name().to_string(),
        config_hash: config_hash(profile, &params)?,
        ..DatasetReport::default()
    };

    let mut fill_columns = Vec::new();
    for (name, class) in profile.classified_columns() {
        let Some(index) = frame.column_index(name) else {
            debug!("column '{}' not present; skipping", name);
            report.absent_columns.push(name.to_string());
            continue;
        };
        match frame.numeric_values(index) {
            Ok(values) => fill_columns.push(FillColumn {
                index,
                name: name.to_string(),
                rule: params.rule_for(class),
                values,
            }),
            Err(err) => {
                warn!("leaving column '{}' unfilled: {}", name, err);
                report.unreadable_columns.push(name.to_string());
            }
        }
    }
    let glucose_slot = fill_columns.iter().position(|c| c.index == glucose_col);

    let inputs: Vec<PartitionInput> = partition_rows(&subjects, &splits, &instants)
        .into_iter()
        .map(|(key, rows, duplicate_timestamps)| PartitionInput {
            timeline: timeline.select(&rows),
            glucose: rows.iter().map(|&r| glucose[r]).collect(),
            columns: fill_columns
                .iter()
                .map(|c| rows.iter().map(|&r| c.values[r]).collect())
                .collect(),
            key,
            rows,
            duplicate_timestamps,
        })
        .collect();
    for input in inputs.iter().filter(|p| p.duplicate_timestamps > 0) {
        warn!(
            "{}: {} duplicate timestamps",
            input.key, input.duplicate_timestamps
        );
    }

    let outputs: Vec<PartitionOutput> = inputs
        .into_par_iter()
        .map(|input| {
            process_partition(
                input,
                &fill_columns,
                glucose_slot,
                params.invalidation_window,
                primitive,
            )
        })
        .collect();

    let mut filled: Vec<Vec<Option<f64>>> = fill_columns.iter().map(|c| c.values.clone()).collect();
    let mut smoothed = vec![None; frame.len()];
    for output in outputs {
        for (slot, values) in output.columns.iter().enumerate() {
            for (&row, &value) in output.rows.iter().zip(values) {
                filled[slot][row] = value;
            }
        }
        for (&row, &value) in output.rows.iter().zip(&output.smoothed) {
            smoothed[row] = value;
        }
        if output.report.smoothing.is_alignment_failure() {
            report.alignment_failures += 1;
        }
        report.partitions.push(output.report);
    }

    for (meta, values) in fill_columns.iter().zip(filled) {
        frame.set_numeric(&meta.name, values)?;
    }
    frame.set_numeric(&profile.smoothed_column, smoothed)?;
    Ok(report)
}

/// Read `input`, impute it and write the result to `output`.
pub fn impute_file(
    input: &Path,
    output: &Path,
    profile: &DatasetProfile,
    params: &ImputeParams,
    primitive: &dyn SmoothingPrimitive,
) -> Result<DatasetReport, ImputeError> {
    let mut frame = Frame::read_csv(input)?;
    let mut report = impute_frame(&mut frame, profile, params, primitive)?;
    report.dataset = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    frame.write_csv(output)?;
    if report.alignment_failures > 0 {
        error!(
            "{}: {} partition(s) have an empty smoothed column",
            output.display(),
            report.alignment_failures
        );
    }
    info!(
        "Imputed {} rows in {} partitions: {}",
        report.rows,
        report.partitions.len(),
        output.display()
    );
    Ok(report)
}
