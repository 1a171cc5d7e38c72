use std::collections::{BTreeSet, HashMap};

use sghalal_core::{comparison_key, Establishment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDisposition {
    Inserted,
    /// Same number, same content (ignoring case and spacing); the newer copy
    /// replaced the stored one.
    Duplicate,
    /// Same number, different content; the newer copy replaced the stored one.
    Conflict,
}

/// Unique establishment set keyed by certification number.
///
/// Later inserts win. Callers control the winner by inserting in term order.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    by_number: HashMap<String, Establishment>,
    conflicts: usize,
    conflicting_numbers: BTreeSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Establishment) -> MergeDisposition {
        match self.by_number.insert(record.number.clone(), record) {
            None => MergeDisposition::Inserted,
            Some(previous) => {
                let current = &self.by_number[&previous.number];
                if previous.differs_from(current) {
                    self.conflicts += 1;
                    self.conflicting_numbers.insert(previous.number);
                    MergeDisposition::Conflict
                } else {
                    MergeDisposition::Duplicate
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn conflicting_numbers(&self) -> &BTreeSet<String> {
        &self.conflicting_numbers
    }

    /// Final records ordered by name (case-insensitive), then number.
    pub fn into_sorted(self) -> Vec<Establishment> {
        let mut records: Vec<_> = self.by_number.into_values().collect();
        records.sort_by_cached_key(|r| (comparison_key(&r.name), r.number.clone()));
        records
    }
}

pub fn dedupe(records: impl IntoIterator<Item = Establishment>) -> Vec<Establishment> {
    let mut dedup = Deduplicator::new();
    for record in records {
        dedup.insert(record);
    }
    dedup.into_sorted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn est(number: &str, name: &str) -> Establishment {
        Establishment {
            name: name.to_string(),
            address: format!("{name} street, Singapore 123456"),
            kind: "Restaurant".to_string(),
            number: number.to_string(),
            scheme: "Eating Establishment".to_string(),
            postal: "123456".to_string(),
        }
    }

    #[test]
    fn later_observation_wins_and_is_counted() {
        let mut dedup = Deduplicator::new();
        assert_eq!(dedup.insert(est("EE-1", "Cafe Alpha")), MergeDisposition::Inserted);
        assert_eq!(dedup.insert(est("EE-1", "Cafe Beta")), MergeDisposition::Conflict);
        assert_eq!(dedup.conflicts(), 1);
        assert!(dedup.conflicting_numbers().contains("EE-1"));

        let records = dedup.into_sorted();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], est("EE-1", "Cafe Beta"));
    }

    #[test]
    fn casing_differences_are_not_conflicts_but_still_replace() {
        let mut dedup = Deduplicator::new();
        dedup.insert(est("EE-1", "Cafe Alpha"));
        let mut shouting = est("EE-1", "Cafe Alpha");
        shouting.name = "CAFE ALPHA".to_string();
        assert_eq!(dedup.insert(shouting.clone()), MergeDisposition::Duplicate);
        assert_eq!(dedup.conflicts(), 0);
        assert_eq!(dedup.into_sorted(), vec![shouting]);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let raw = vec![
            est("EE-3", "zeta"),
            est("EE-1", "Alpha"),
            est("EE-2", "beta"),
            est("EE-1", "Alpha Prime"),
            est("EE-3", "zeta"),
        ];
        let once = dedupe(raw);
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn output_has_unique_numbers_sorted_by_name() {
        let raw = (0..50).map(|i| est(&format!("N-{}", i % 17), &format!("Shop {}", i % 5)));
        let records = dedupe(raw);
        let numbers: HashSet<_> = records.iter().map(|r| r.number.clone()).collect();
        assert_eq!(numbers.len(), records.len());
        assert_eq!(records.len(), 17);

        let keys: Vec<_> = records
            .iter()
            .map(|r| (comparison_key(&r.name), r.number.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
