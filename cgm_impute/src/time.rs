//! Timestamp model for dataset time columns.
//!
//! A column is either entirely naive (wall clock, read as UTC when an
//! instant is needed) or entirely offset-aware. Smoothed output is brought
//! back into the awareness of the series it came from before any join.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, Utc};

use crate::ImputeError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

/// Parse one timestamp cell.
pub fn parse_stamp(raw: &str) -> Option<Stamp> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Stamp::Aware(dt));
    }
    for fmt in AWARE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(Stamp::Aware(dt));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Stamp::Naive(dt));
        }
    }
    None
}

#[derive(Clone, Debug, PartialEq)]
pub enum Timeline {
    Naive(Vec<NaiveDateTime>),
    Aware(Vec<DateTime<FixedOffset>>),
}

impl Timeline {
    /// Parse a whole time column. Mixed naive/aware cells are rejected.
    pub fn parse<'a, I>(cells: I) -> Result<Self, ImputeError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut naive = Vec::new();
        let mut aware = Vec::new();
        for (row, cell) in cells.into_iter().enumerate() {
            match parse_stamp(cell) {
                Some(Stamp::Naive(dt)) if aware.is_empty() => naive.push(dt),
                Some(Stamp::Aware(dt)) if naive.is_empty() => aware.push(dt),
                Some(_) => {
                    return Err(ImputeError::SchemaMismatch(format!(
                        "time column mixes naive and offset-aware timestamps (row {})",
                        row
                    )))
                }
                None => {
                    return Err(ImputeError::InvalidTimestamp {
                        row,
                        value: cell.to_string(),
                    })
                }
            }
        }
        if aware.is_empty() {
            Ok(Timeline::Naive(naive))
        } else {
            Ok(Timeline::Aware(aware))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Timeline::Naive(v) => v.len(),
            Timeline::Aware(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_naive(&self) -> bool {
        matches!(self, Timeline::Naive(_))
    }

    /// Seconds since the Unix epoch; naive stamps are read as UTC.
    pub fn instants(&self) -> Vec<i64> {
        match self {
            Timeline::Naive(v) => v.iter().map(|dt| dt.and_utc().timestamp()).collect(),
            Timeline::Aware(v) => v.iter().map(|dt| dt.timestamp()).collect(),
        }
    }

    /// Rows at the given positions, in that order.
    pub fn select(&self, rows: &[usize]) -> Timeline {
        match self {
            Timeline::Naive(v) => Timeline::Naive(rows.iter().map(|&i| v[i]).collect()),
            Timeline::Aware(v) => Timeline::Aware(rows.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Offset used to localize naive stamps into this timeline.
    fn reference_offset(&self) -> FixedOffset {
        match self {
            Timeline::Aware(v) => v.first().map(|dt| *dt.offset()).unwrap_or_else(utc_offset),
            Timeline::Naive(_) => utc_offset(),
        }
    }

    /// Express `self` with the same timezone awareness as `target`.
    ///
    /// Aware → naive converts to UTC and drops the offset. Naive → aware
    /// reads each value as target wall time and gives it the offset the
    /// target carries at that wall time (or at the nearest one), so a
    /// partition spanning an offset change lines up on both sides of it.
    /// Aware → aware converts to the target's first offset; instants are
    /// unchanged.
    pub fn reconcile_to(self, target: &Timeline) -> Timeline {
        match (self, target) {
            (Timeline::Naive(v), Timeline::Naive(_)) => Timeline::Naive(v),
            (Timeline::Aware(v), Timeline::Naive(_)) => {
                Timeline::Naive(v.into_iter().map(|dt| dt.naive_utc()).collect())
            }
            (Timeline::Naive(v), Timeline::Aware(stamps)) => {
                let mut offsets: BTreeMap<NaiveDateTime, FixedOffset> = BTreeMap::new();
                for dt in stamps {
                    offsets.entry(dt.naive_local()).or_insert(*dt.offset());
                }
                Timeline::Aware(
                    v.into_iter()
                        .map(|local| localize(local, offset_at(&offsets, local)))
                        .collect(),
                )
            }
            (Timeline::Aware(v), Timeline::Aware(_)) => {
                let offset = target.reference_offset();
                Timeline::Aware(v.into_iter().map(|dt| dt.with_timezone(&offset)).collect())
            }
        }
    }
}

/// Offset in force at wall time `local`: exact match first, else the
/// nearest wall time, the earlier one on a tie.
fn offset_at(
    offsets: &BTreeMap<NaiveDateTime, FixedOffset>,
    local: NaiveDateTime,
) -> FixedOffset {
    let before = offsets.range(..=local).next_back();
    let after = offsets.range(local..).next();
    match (before, after) {
        (Some((b, ob)), Some((a, oa))) => {
            if local - *b <= *a - local {
                *ob
            } else {
                *oa
            }
        }
        (Some((_, o)), None) | (None, Some((_, o))) => *o,
        (None, None) => utc_offset(),
    }
}

fn localize(local: NaiveDateTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let shift = Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(local - shift, offset)
}

pub(crate) fn utc_offset() -> FixedOffset {
    Utc.fix()
}
