//! RSS 2.0 and Atom parsing into raw [`FeedEntry`] records.
//!
//! Only the fields the normalizer needs are read. Unknown elements are
//! ignored; a feed that is not well-formed XML fails as a whole.

use std::borrow::Cow;

use gazette_core::content::FeedEntry;
use quick_xml::{
  Reader,
  events::{BytesStart, BytesText, Event},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("feed is not valid XML: {0}")]
pub struct FeedError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
  Title,
  Link,
  Content,
  Summary,
  Published,
}

fn field_for(local: &[u8]) -> Option<Field> {
  match local {
    b"title" => Some(Field::Title),
    b"link" => Some(Field::Link),
    // `content:encoded` in RSS, `content` in Atom
    b"encoded" | b"content" => Some(Field::Content),
    b"description" | b"summary" => Some(Field::Summary),
    b"pubDate" | b"published" | b"updated" | b"date" => Some(Field::Published),
    _ => None,
  }
}

/// Parse every `<item>` (RSS) and `<entry>` (Atom) in `xml`.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FeedError> {
  let mut reader = Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut entries = Vec::new();
  let mut current: Option<FeedEntry> = None;
  // The field being captured and the local name of its element.
  let mut capture: Option<(Field, Vec<u8>)> = None;
  let mut text = String::new();

  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => {
        let local = e.local_name().as_ref().to_vec();
        if is_entry(&local) {
          current = Some(FeedEntry::default());
        } else if let Some(entry) = current.as_mut()
          && capture.is_none()
          && let Some(field) = field_for(&local)
        {
          if field == Field::Link && let Some(href) = atom_href(e) {
            set_link(entry, href);
          } else {
            capture = Some((field, local));
            text.clear();
          }
        }
      }
      Ok(Event::Empty(ref e)) => {
        if let Some(entry) = current.as_mut()
          && e.local_name().as_ref() == b"link"
          && let Some(href) = atom_href(e)
        {
          set_link(entry, href);
        }
      }
      Ok(Event::Text(ref t)) => {
        if capture.is_some() {
          text.push_str(&unescape_lossy(t));
        }
      }
      Ok(Event::CData(ref c)) => {
        if capture.is_some() {
          text.push_str(&String::from_utf8_lossy(c));
        }
      }
      Ok(Event::End(ref e)) => {
        let local = e.local_name();
        if let Some((field, name)) = capture.as_ref()
          && name.as_slice() == local.as_ref()
        {
          if let Some(entry) = current.as_mut() {
            assign(entry, *field, std::mem::take(&mut text));
          }
          capture = None;
        } else if is_entry(local.as_ref())
          && let Some(entry) = current.take()
        {
          entries.push(entry);
        }
      }
      Ok(Event::Eof) => break,
      Ok(_) => {}
      Err(e) => return Err(FeedError(e.to_string())),
    }
  }

  Ok(entries)
}

fn is_entry(local: &[u8]) -> bool { matches!(local, b"item" | b"entry") }

/// Atom links carry their target in `href`; only `alternate` (or unmarked)
/// links point at the entry itself.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
  let attr = |name: &str| -> Option<String> {
    e.try_get_attribute(name)
      .ok()
      .flatten()
      .and_then(|a| a.unescape_value().ok().map(Cow::into_owned))
  };
  let href = attr("href")?;
  match attr("rel").as_deref() {
    None | Some("alternate") => Some(href),
    Some(_) => None,
  }
}

fn set_link(entry: &mut FeedEntry, href: String) {
  if entry.link.is_none() {
    entry.link = Some(href);
  }
}

fn assign(entry: &mut FeedEntry, field: Field, value: String) {
  let slot = match field {
    Field::Title => &mut entry.title,
    Field::Link => &mut entry.link,
    Field::Content => &mut entry.content_html,
    Field::Summary => &mut entry.summary_html,
    Field::Published => &mut entry.published,
  };
  if slot.is_none() {
    *slot = Some(value);
  }
}

/// Feed text often carries HTML entities XML does not define; keep those
/// for the normalizer to decode.
fn unescape_lossy<'a>(t: &'a BytesText<'a>) -> Cow<'a, str> {
  t.unescape()
    .unwrap_or_else(|_| String::from_utf8_lossy(t))
}
