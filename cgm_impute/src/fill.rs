//! Gap-bounded filling for one column of one (subject, split) partition.
//!
//! Forward-fill carries the last valid observation across at most
//! `max_run` samples of a gap; zero-fill writes `0.0` into at most
//! `max_run` samples of a gap. Samples past the bound stay missing. When
//! `zero_is_missing` is set, literal zeros are turned into gaps first.

use serde::{Deserialize, Serialize};

use crate::gaps::{is_missing, missing_runs};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FillClass {
    /// Biosignals: skin conductance, skin/ambient temperature, heart rate.
    ForwardFill,
    /// Events and doses: carbohydrates, insulin, steps, acceleration.
    ZeroFill,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FillRule {
    pub class: FillClass,
    pub max_run: usize,
    pub zero_is_missing: bool,
}

/// What the filler did to a column.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FillReport {
    /// Literal zeros reclassified as missing.
    pub sentinel_zeros: usize,
    /// Missing samples that received a value.
    pub filled: usize,
    /// Missing samples left missing after the fill.
    pub left_missing: usize,
}

impl FillReport {
    pub fn merge(&mut self, other: &FillReport) {
        self.sentinel_zeros += other.sentinel_zeros;
        self.filled += other.filled;
        self.left_missing += other.left_missing;
    }
}

/// Fill `values` in place according to `rule`. The bound is inclusive: a
/// gap of exactly `max_run` samples is filled completely.
pub fn fill_bounded(values: &mut [Option<f64>], rule: &FillRule) -> FillReport {
    let mut report = FillReport::default();

    for value in values.iter_mut() {
        if rule.zero_is_missing && *value == Some(0.0) {
            *value = None;
            report.sentinel_zeros += 1;
        } else if is_missing(*value) {
            *value = None;
        }
    }

    for gap in missing_runs(values) {
        let fill_value = match rule.class {
            FillClass::ForwardFill => match gap.start.checked_sub(1).and_then(|i| values[i]) {
                Some(last) => last,
                // Leading gap: nothing to carry forward.
                None => {
                    report.left_missing += gap.len;
                    continue;
                }
            },
            FillClass::ZeroFill => 0.0,
        };
        let reach = gap.len.min(rule.max_run);
        for slot in &mut values[gap.start..gap.start + reach] {
            *slot = Some(fill_value);
        }
        report.filled += reach;
        report.left_missing += gap.len - reach;
    }

    report
}
