use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sghalal_core::{Establishment, HarvestStats};

/// Totals and per-type / per-scheme counts for a deduplicated set.
///
/// Groups are keyed by the stored value, so establishments without a type or
/// scheme are counted under the empty string.
pub fn compute_stats(records: &[Establishment], last_updated: DateTime<Utc>) -> HarvestStats {
    let mut types: BTreeMap<String, usize> = BTreeMap::new();
    let mut schemes: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *types.entry(record.kind.clone()).or_default() += 1;
        *schemes.entry(record.scheme.clone()).or_default() += 1;
    }
    HarvestStats {
        last_updated,
        total_establishments: records.len(),
        types,
        schemes,
    }
}
