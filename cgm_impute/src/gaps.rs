//! Runs of missing samples and per-column gap statistics.

use serde::{Deserialize, Serialize};

/// A maximal run of consecutive missing samples, in partition row order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gap {
    pub start: usize,
    pub len: usize,
}

impl Gap {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

pub(crate) fn is_missing(value: Option<f64>) -> bool {
    match value {
        Some(v) => !v.is_finite(),
        None => true,
    }
}

/// All maximal missing runs. `None` and non-finite values count as missing.
pub fn missing_runs(values: &[Option<f64>]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut run_start: Option<usize> = None;
    for (idx, value) in values.iter().enumerate() {
        match (is_missing(*value), run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                gaps.push(Gap {
                    start,
                    len: idx - start,
                });
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        gaps.push(Gap {
            start,
            len: values.len() - start,
        });
    }
    gaps
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GapSummary {
    pub samples: usize,
    pub missing: usize,
    pub gaps: usize,
    pub longest_gap: usize,
    /// Gaps strictly longer than the limit passed to [`summarize`].
    pub gaps_over_limit: usize,
}

impl GapSummary {
    pub fn merge(&mut self, other: &GapSummary) {
        self.samples += other.samples;
        self.missing += other.missing;
        self.gaps += other.gaps;
        self.longest_gap = self.longest_gap.max(other.longest_gap);
        self.gaps_over_limit += other.gaps_over_limit;
    }
}

pub fn summarize(values: &[Option<f64>], limit: usize) -> GapSummary {
    let runs = missing_runs(values);
    GapSummary {
        samples: values.len(),
        missing: runs.iter().map(|g| g.len).sum(),
        gaps: runs.len(),
        longest_gap: runs.iter().map(|g| g.len).max().unwrap_or(0),
        gaps_over_limit: runs.iter().filter(|g| g.len > limit).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_cover_edges_and_nan() {
        let values = [None, Some(1.0), Some(f64::NAN), None, Some(2.0), None];
        let runs = missing_runs(&values);
        assert_eq!(
            runs,
            vec![
                Gap { start: 0, len: 1 },
                Gap { start: 2, len: 2 },
                Gap { start: 5, len: 1 },
            ]
        );
        assert_eq!(runs[1].end(), 4);
    }

    #[test]
    fn no_runs_when_complete() {
        assert!(missing_runs(&[Some(1.0), Some(2.0)]).is_empty());
        assert!(missing_runs(&[]).is_empty());
    }

    #[test]
    fn summary_counts_long_gaps() {
        let mut values = vec![Some(5.0); 4];
        values.extend(vec![None; 13]);
        values.push(Some(5.0));
        values.extend(vec![None; 3]);
        let summary = summarize(&values, 12);
        assert_eq!(summary.samples, 21);
        assert_eq!(summary.missing, 16);
        assert_eq!(summary.gaps, 2);
        assert_eq!(summary.longest_gap, 13);
        assert_eq!(summary.gaps_over_limit, 1);
    }
}
