//! Website-change detection.
//!
//! A page is reduced to the visible text of its watched region and compared
//! with the newest stored snapshot of the same source. The change ratio is
//! `1 - similarity`, with similarity measured as the Sørensen–Dice
//! coefficient over character bigrams.

use std::{collections::HashSet, sync::LazyLock};

use gazette_core::{
  catalog::SourceParams,
  model::Snapshot,
  normalize::{collapse_whitespace, dedupe_preserving_order},
};
use scraper::{ElementRef, Html, Selector};

static TITLE: LazyLock<Selector> =
  LazyLock::new(|| Selector::parse("title").expect("static selector"));

static BODY: LazyLock<Selector> =
  LazyLock::new(|| Selector::parse("body").expect("static selector"));

static ANCHOR: LazyLock<Selector> =
  LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Elements whose text is never visible.
const HIDDEN: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, thiserror::Error)]
#[error("invalid css selector {css:?}: {reason}")]
pub struct InvalidSelector {
  pub css:    String,
  pub reason: String,
}

/// The parsed region selectors of a `website_change` source.
#[derive(Debug, Default)]
pub struct PageSelectors {
  content: Option<Selector>,
  title:   Option<Selector>,
  remove:  Vec<Selector>,
}

impl PageSelectors {
  pub fn from_params(params: &SourceParams) -> Result<Self, InvalidSelector> {
    Ok(Self {
      content: parse_optional(params.content_css.as_deref())?,
      title:   parse_optional(params.title_css.as_deref())?,
      remove:  params
        .remove_css
        .iter()
        .filter(|css| !css.trim().is_empty())
        .map(|css| parse_selector(css))
        .collect::<Result<_, _>>()?,
    })
  }
}

fn parse_optional(css: Option<&str>) -> Result<Option<Selector>, InvalidSelector> {
  css.filter(|css| !css.trim().is_empty()).map(parse_selector).transpose()
}

fn parse_selector(css: &str) -> Result<Selector, InvalidSelector> {
  Selector::parse(css).map_err(|e| InvalidSelector { css: css.to_owned(), reason: e.to_string() })
}

/// The visible parts of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
  pub title: String,
  pub text:  String,
  pub links: Vec<String>,
}

/// Reduce a page to its title and the text and links of the watched region.
///
/// Elements matching a removal selector are dropped first. The region is the
/// first remaining match of the content selector, else `<body>`, else the
/// whole document. The title comes from the title selector, else `<title>`.
pub fn reduce_page(html: &str, selectors: &PageSelectors, strip_whitespace: bool) -> PageText {
  let document = Html::parse_document(html);
  let clean = |s: String| if strip_whitespace { collapse_whitespace(&s) } else { s };

  let removed: HashSet<_> = selectors
    .remove
    .iter()
    .flat_map(|sel| document.select(sel))
    .map(|el| el.id())
    .collect();
  let is_removed = |el: &ElementRef<'_>| {
    removed.contains(&el.id()) || el.ancestors().any(|a| removed.contains(&a.id()))
  };
  let first_kept = |sel: &Selector| document.select(sel).find(|el| !is_removed(el));

  let title = selectors
    .title
    .as_ref()
    .and_then(first_kept)
    .or_else(|| document.select(&TITLE).next())
    .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
    .unwrap_or_default();

  let region = selectors
    .content
    .as_ref()
    .and_then(first_kept)
    .or_else(|| document.select(&BODY).next())
    .unwrap_or_else(|| document.root_element());

  let text = region
    .descendants()
    .filter_map(|node| {
      let text = node.value().as_text()?;
      let visible = node.ancestors().all(|a| {
        !removed.contains(&a.id())
          && a.value().as_element().is_none_or(|e| !HIDDEN.contains(&e.name()))
      });
      visible.then_some(&**text)
    })
    .collect::<Vec<_>>()
    .join(" ");

  let links = region
    .select(&ANCHOR)
    .filter(|a| !is_removed(a))
    .filter_map(|a| a.value().attr("href"))
    .map(|href| href.trim().to_owned())
    .filter(|href| !href.is_empty());

  PageText { title, text: clean(text), links: dedupe_preserving_order(links) }
}

pub fn change_ratio(old: &str, new: &str) -> f64 {
  1.0 - strsim::sorensen_dice(old, new)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
  /// No earlier snapshot exists.
  First,
  Unchanged,
  BelowThreshold(f64),
  Changed(f64),
}

impl Change {
  pub fn emits_item(self) -> bool { matches!(self, Self::First | Self::Changed(_)) }
}

/// Compare the current text (and its hash) against the previous snapshot.
pub fn detect(
  previous:  Option<&Snapshot>,
  hash:      &str,
  text:      &str,
  threshold: f64,
) -> Change {
  let Some(previous) = previous else {
    return Change::First;
  };
  if previous.content_hash == hash {
    return Change::Unchanged;
  }
  let ratio = change_ratio(&previous.content_text, text);
  if ratio < threshold {
    Change::BelowThreshold(ratio)
  } else {
    Change::Changed(ratio)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use gazette_core::normalize::sha256_hex;

  use super::*;

  fn snapshot(text: &str) -> Snapshot {
    Snapshot {
      source_id:    "page".into(),
      url:          "https://site.test/".into(),
      content_hash: sha256_hex(text),
      content_text: text.into(),
      created_at:   Utc::now(),
    }
  }

  fn selectors(content: Option<&str>, title: Option<&str>, remove: &[&str]) -> PageSelectors {
    PageSelectors::from_params(&SourceParams {
      content_css: content.map(Into::into),
      title_css: title.map(Into::into),
      remove_css: remove.iter().map(|s| s.to_string()).collect(),
      ..SourceParams::default()
    })
    .unwrap()
  }

  #[test]
  fn page_is_reduced_to_body_text() {
    let html = r#"<html><head><title> Status
        page </title><style>p{}</style></head>
      <body><h1>All good</h1><p>See <a href="https://site.test/log">log</a>.</p>
      <script>track()</script></body></html>"#;
    let page = reduce_page(html, &PageSelectors::default(), true);
    assert_eq!(page.title, "Status page");
    assert_eq!(page.text, "All good See log .");
    assert_eq!(page.links, vec!["https://site.test/log".to_owned()]);
  }

  const RELEASES: &str = r#"<html><head><title>Site</title></head><body>
      <nav>Visitors today: 1041 <a href="/stats">stats</a></nav>
      <main><h2 class="name">Release 2.1</h2>
        <p>Adds export. <a href="/notes/2.1">notes</a></p>
        <aside class="ad">Buy now, 20% off</aside></main>
      <footer>Rendered at 10:41:07</footer></body></html>"#;

  #[test]
  fn content_region_and_removals_narrow_the_text() {
    let sel = selectors(Some("main"), Some("main .name"), &[".ad"]);
    let page = reduce_page(RELEASES, &sel, true);
    assert_eq!(page.title, "Release 2.1");
    assert_eq!(page.text, "Release 2.1 Adds export. notes");
    assert_eq!(page.links, vec!["/notes/2.1".to_owned()]);
  }

  #[test]
  fn churn_outside_the_region_is_unchanged() {
    let sel = selectors(Some("main"), None, &[".ad"]);
    let before = reduce_page(RELEASES, &sel, true);
    let churned = RELEASES
      .replace("1041", "1187")
      .replace("10:41:07", "10:52:30")
      .replace("20% off", "half price");
    let after = reduce_page(&churned, &sel, true);
    assert_eq!(before.text, after.text);

    let change = detect(Some(&snapshot(&before.text)), &sha256_hex(&after.text), &after.text, 0.1);
    assert_eq!(change, Change::Unchanged);

    // Without the selectors the same churn is seen.
    let whole = reduce_page(RELEASES, &PageSelectors::default(), true);
    let whole_after = reduce_page(&churned, &PageSelectors::default(), true);
    assert_ne!(whole.text, whole_after.text);
  }

  #[test]
  fn unmatched_content_selector_falls_back_to_body() {
    let page = reduce_page(RELEASES, &selectors(Some("#missing"), None, &["nav", "footer"]), true);
    assert!(page.text.starts_with("Release 2.1"), "{}", page.text);
    assert_eq!(page.title, "Site");
  }

  #[test]
  fn invalid_selector_is_an_error() {
    let params = SourceParams { remove_css: vec!["nav[".into()], ..SourceParams::default() };
    let err = PageSelectors::from_params(&params).unwrap_err();
    assert_eq!(err.css, "nav[");
  }

  #[test]
  fn first_poll_emits() {
    assert_eq!(detect(None, "h", "text", 0.1), Change::First);
    assert!(Change::First.emits_item());
  }

  #[test]
  fn same_hash_is_unchanged() {
    let prev = snapshot("the same text");
    let change = detect(Some(&prev), &sha256_hex("the same text"), "the same text", 0.1);
    assert_eq!(change, Change::Unchanged);
    assert!(!change.emits_item());
  }

  #[test]
  fn small_edits_stay_below_threshold() {
    let old = "The quarterly report is published on the first Monday of each month.";
    let new = "The quarterly report is published on the first Monday of each month!";
    let change = detect(Some(&snapshot(old)), &sha256_hex(new), new, 0.1);
    assert!(matches!(change, Change::BelowThreshold(r) if r < 0.1), "{change:?}");
  }

  #[test]
  fn rewrites_are_changes() {
    let old = "Service operating normally.";
    let new = "Major outage affecting all regions since 09:00 UTC.";
    let change = detect(Some(&snapshot(old)), &sha256_hex(new), new, 0.1);
    assert!(change.emits_item(), "{change:?}");
  }
}
