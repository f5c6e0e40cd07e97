//! The selector/ranker: picks a bounded, ordered subset of stored units for a
//! digest run.
//!
//! Scoring is `published_at` (epoch seconds) times the source kind's weight;
//! undated units score zero. Candidates are stable-sorted by descending score
//! and walked once, skipping units whose source is at its cap, until the total
//! cap is reached. Nothing is re-scored mid-walk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
  Result,
  catalog::{SelectionPolicy, SourceKind},
  clock::days_before,
  content::StoredUnit,
  dedup::dedupe_across_sources,
};

/// The trailing `[now - days, now]` window candidates are drawn from.
pub fn window(now: DateTime<Utc>, days: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
  Ok((days_before(now, days)?, now))
}

pub fn score(published_at: Option<DateTime<Utc>>, weight: f64) -> f64 {
  published_at.map_or(0.0, |p| p.timestamp() as f64 * weight)
}

/// Rank `candidates` (in fetch order) and apply the policy's caps.
///
/// Sources missing from `kinds`, and kinds missing from the policy's weight
/// table, weigh `1.0`.
pub fn select(
  candidates: Vec<StoredUnit>,
  kinds:      &HashMap<String, SourceKind>,
  policy:     &SelectionPolicy,
) -> Vec<StoredUnit> {
  let weight_of = |source_id: &str| {
    kinds
      .get(source_id)
      .and_then(|kind| policy.weights.get(kind))
      .copied()
      .unwrap_or(1.0)
  };

  let mut scored: Vec<(f64, StoredUnit)> = candidates
    .into_iter()
    .map(|c| (score(c.unit.published_at, weight_of(&c.unit.source_id)), c))
    .collect();

  // `sort_by` is stable, so equal scores keep fetch order.
  scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));

  let mut per_source: HashMap<String, usize> = HashMap::new();
  let mut selected = Vec::new();

  for (_, candidate) in scored {
    if selected.len() >= policy.max_items_total {
      break;
    }
    let taken = per_source.entry(candidate.unit.source_id.clone()).or_insert(0);
    if policy.per_source_limit.is_some_and(|limit| *taken >= limit) {
      continue;
    }
    *taken += 1;
    selected.push(candidate);
  }

  if policy.dedupe_across_sources {
    selected = dedupe_across_sources(selected);
  }

  selected
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::content::ContentUnit;

  fn stored(id: i64, source: &str, fp: &str, published: Option<i64>) -> StoredUnit {
    StoredUnit {
      id,
      unit: ContentUnit {
        source_id:    source.into(),
        title:        format!("item {id}"),
        body_text:    String::new(),
        url:          None,
        published_at: published.map(|t| Utc.timestamp_opt(t, 0).unwrap()),
        ingested_at:  Utc.timestamp_opt(1_000, 0).unwrap(),
        links:        vec![],
        fingerprint:  fp.into(),
      },
    }
  }

  fn policy(max: usize, per_source: Option<usize>) -> SelectionPolicy {
    SelectionPolicy {
      max_items_total: max,
      per_source_limit: per_source,
      weights: HashMap::new(),
      ..SelectionPolicy::default()
    }
  }

  fn ids(units: &[StoredUnit]) -> Vec<i64> { units.iter().map(|s| s.id).collect() }

  #[test]
  fn caps_total_and_per_source() {
    let candidates = vec![
      stored(1, "s1", "f1", Some(100)),
      stored(2, "s1", "f2", Some(100)),
      stored(3, "s2", "f3", Some(50)),
    ];
    let picked = select(candidates, &HashMap::new(), &policy(2, Some(1)));

    assert_eq!(picked.len(), 2);
    assert_eq!(picked.iter().filter(|s| s.unit.source_id == "s1").count(), 1);
    assert_eq!(ids(&picked), vec![1, 3]);
  }

  #[test]
  fn sorts_descending_with_stable_ties_and_undated_last() {
    let candidates = vec![
      stored(1, "s1", "a", None),
      stored(2, "s1", "b", Some(10)),
      stored(3, "s1", "c", Some(30)),
      stored(4, "s1", "d", Some(10)),
    ];
    let picked = select(candidates, &HashMap::new(), &policy(10, None));
    assert_eq!(ids(&picked), vec![3, 2, 4, 1]);
  }

  #[test]
  fn weights_follow_source_kind() {
    let kinds = HashMap::from([
      ("feed".to_owned(), SourceKind::Rss),
      ("site".to_owned(), SourceKind::WebsiteChange),
    ]);
    let mut p = policy(10, None);
    p.weights = HashMap::from([(SourceKind::WebsiteChange, 2.0)]);

    let candidates = vec![stored(1, "feed", "a", Some(150)), stored(2, "site", "b", Some(100))];
    assert_eq!(ids(&select(candidates, &kinds, &p)), vec![2, 1]);
  }

  #[test]
  fn zero_cap_selects_nothing() {
    let candidates = vec![stored(1, "s1", "a", Some(1))];
    assert!(select(candidates, &HashMap::new(), &policy(0, None)).is_empty());
  }

  #[test]
  fn cross_source_dedup_trims_without_reordering() {
    let mut p = policy(10, None);
    p.dedupe_across_sources = true;
    let candidates = vec![
      stored(1, "s1", "same", Some(300)),
      stored(2, "s2", "same", Some(200)),
      stored(3, "s2", "other", Some(100)),
    ];
    assert_eq!(ids(&select(candidates, &HashMap::new(), &p)), vec![1, 3]);
  }

  #[test]
  fn window_trails_now() {
    let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
    let (start, end) = window(now, 2).unwrap();
    assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    assert_eq!(end, now);
  }

  #[test]
  fn oversized_window_is_an_error() {
    let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
    assert!(matches!(window(now, u32::MAX), Err(crate::Error::DaysOutOfRange(_))));
  }
}
