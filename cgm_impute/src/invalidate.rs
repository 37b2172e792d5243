//! Invalidation of the smoothed estimate across sustained raw outages.

use crate::gaps::missing_runs;

/// Clear `smoothed` over every `window`-sample span in which `raw` is
/// entirely missing. Overlapping windows union, so any raw gap of at least
/// `window` samples is cleared end to end. Returns the number of smoothed
/// samples that changed from present to missing.
///
/// Both slices are in the partition's time order and have equal length.
pub fn invalidate_gaps(raw: &[Option<f64>], smoothed: &mut [Option<f64>], window: usize) -> usize {
    if window == 0 || raw.len() != smoothed.len() {
        return 0;
    }
    let mut cleared = 0;
    for gap in missing_runs(raw).into_iter().filter(|g| g.len >= window) {
        for slot in &mut smoothed[gap.start..gap.end()] {
            if slot.take().is_some() {
                cleared += 1;
            }
        }
    }
    cleared
}
