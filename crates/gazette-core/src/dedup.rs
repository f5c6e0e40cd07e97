//! In-memory deduplication of content units.
//!
//! This is the first line of defence; the store's unique constraint on
//! `(source_id, fingerprint)` is the second.

use std::{collections::HashSet, hash::Hash};

use crate::content::{ContentUnit, StoredUnit};

/// Keep the first item per key, preserving the relative order of survivors.
pub fn first_by_key<T, K, F>(items: impl IntoIterator<Item = T>, mut key: F) -> Vec<T>
where
  K: Eq + Hash,
  F: FnMut(&T) -> K,
{
  let mut seen = HashSet::new();
  items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// One unit per `(source_id, fingerprint)`; first occurrence wins.
pub fn dedupe_units(units: impl IntoIterator<Item = ContentUnit>) -> Vec<ContentUnit> {
  first_by_key(units, |u| (u.source_id.clone(), u.fingerprint.clone()))
}

/// One unit per fingerprint regardless of source; used after selection when a
/// digest asks for cross-source deduplication. Rank order is untouched.
pub fn dedupe_across_sources(units: impl IntoIterator<Item = StoredUnit>) -> Vec<StoredUnit> {
  first_by_key(units, |s| s.unit.fingerprint.clone())
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;

  fn unit(source: &str, fp: &str, title: &str) -> ContentUnit {
    ContentUnit {
      source_id:    source.into(),
      title:        title.into(),
      body_text:    String::new(),
      url:          None,
      published_at: None,
      ingested_at:  Utc::now(),
      links:        vec![],
      fingerprint:  fp.into(),
    }
  }

  #[test]
  fn first_occurrence_wins_per_source_and_fingerprint() {
    let units = vec![
      unit("s1", "f1", "first"),
      unit("s2", "f1", "other source"),
      unit("s1", "f2", "second"),
      unit("s1", "f1", "repeat"),
      unit("s2", "f1", "repeat other"),
    ];
    let titles: Vec<_> = dedupe_units(units).into_iter().map(|u| u.title).collect();
    assert_eq!(titles, vec!["first", "other source", "second"]);
  }

  #[test]
  fn cross_source_dedup_ignores_source() {
    let stored = |id, source, fp| StoredUnit { id, unit: unit(source, fp, "") };
    let kept: Vec<_> = dedupe_across_sources(vec![
      stored(3, "s1", "f1"),
      stored(1, "s2", "f1"),
      stored(2, "s2", "f2"),
    ])
    .into_iter()
    .map(|s| s.id)
    .collect();
    assert_eq!(kept, vec![3, 2]);
  }

  #[test]
  fn empty_input_is_empty_output() {
    assert!(dedupe_units(Vec::new()).is_empty());
  }
}
