//! The built-in renderer: a plain-text body and a minimal HTML body.

use std::fmt::Write as _;

use gazette_core::render::{RenderContext, RenderError, RenderedMessage, Renderer};
use html_escape::{encode_double_quoted_attribute as esc_attr, encode_text as esc};

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
  fn render(&self, ctx: &RenderContext) -> Result<RenderedMessage, RenderError> {
    Ok(RenderedMessage {
      subject: ctx.subject.clone(),
      html:    render_html(ctx).map_err(|e| RenderError(e.to_string()))?,
      text:    render_text(ctx).map_err(|e| RenderError(e.to_string()))?,
    })
  }
}

fn greeting(ctx: &RenderContext) -> String {
  match ctx.recipient_name.as_deref() {
    Some(name) if !name.trim().is_empty() => format!("Hello {name},"),
    _ => "Hello,".to_owned(),
  }
}

fn render_text(ctx: &RenderContext) -> Result<String, std::fmt::Error> {
  let mut out = String::new();
  writeln!(out, "{}", ctx.subject)?;
  writeln!(out)?;
  writeln!(out, "{}", greeting(ctx))?;
  writeln!(out)?;

  if ctx.items.is_empty() {
    writeln!(out, "Nothing new this period.")?;
    writeln!(out)?;
  }
  for item in &ctx.items {
    writeln!(out, "{}. {}", item.rank, item.title)?;
    if !item.summary.is_empty() {
      writeln!(out, "   {}", item.summary)?;
    }
    if let Some(url) = &item.url {
      writeln!(out, "   {url}")?;
    }
    writeln!(out)?;
  }

  if !ctx.links.is_empty() {
    writeln!(out, "Links:")?;
    for link in &ctx.links {
      writeln!(out, "- {link}")?;
    }
    writeln!(out)?;
  }

  write!(out, "Unsubscribe: {}", ctx.unsubscribe_url)?;
  Ok(out)
}

fn render_html(ctx: &RenderContext) -> Result<String, std::fmt::Error> {
  let mut out = String::new();
  writeln!(out, "<!DOCTYPE html>")?;
  writeln!(out, "<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>", esc(&ctx.subject))?;
  writeln!(out, "<h1>{}</h1>", esc(&ctx.digest_name))?;
  writeln!(
    out,
    "<p>{} &ndash; {}</p>",
    ctx.period_start.format("%Y-%m-%d"),
    ctx.period_end.format("%Y-%m-%d")
  )?;
  writeln!(out, "<p>{}</p>", esc(&greeting(ctx)))?;

  if ctx.items.is_empty() {
    writeln!(out, "<p>Nothing new this period.</p>")?;
  } else {
    writeln!(out, "<ol>")?;
    for item in &ctx.items {
      write!(out, "<li>")?;
      match &item.url {
        Some(url) => write!(out, "<a href=\"{}\">{}</a>", esc_attr(url), esc(&item.title))?,
        None => write!(out, "<strong>{}</strong>", esc(&item.title))?,
      }
      if !item.summary.is_empty() {
        write!(out, "<p>{}</p>", esc(&item.summary))?;
      }
      writeln!(out, "</li>")?;
    }
    writeln!(out, "</ol>")?;
  }

  if !ctx.links.is_empty() {
    writeln!(out, "<h2>Links</h2><ul>")?;
    for link in &ctx.links {
      writeln!(out, "<li><a href=\"{}\">{}</a></li>", esc_attr(link), esc(link))?;
    }
    writeln!(out, "</ul>")?;
  }

  writeln!(
    out,
    "<p><small><a href=\"{}\">Unsubscribe</a></small></p>",
    esc_attr(&ctx.unsubscribe_url)
  )?;
  if let Some(pixel) = &ctx.open_pixel_url {
    writeln!(out, "<img src=\"{}\" width=\"1\" height=\"1\" alt=\"\">", esc_attr(pixel))?;
  }
  write!(out, "</body></html>")?;
  Ok(out)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use gazette_core::render::RenderItem;

  use super::*;

  fn ctx() -> RenderContext {
    RenderContext {
      digest_name:     "Daily <Brief>".into(),
      run_id:          7,
      period_start:    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
      period_end:      NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
      recipient_email: "a@x.test".into(),
      recipient_name:  Some("Ada".into()),
      subject:         "Daily: 2024-06-01 to 2024-06-03".into(),
      items:           vec![RenderItem {
        rank:         1,
        title:        "Fish & chips".into(),
        summary:      "Tasty.".into(),
        source_id:    "feed".into(),
        published_at: None,
        url:          Some("https://t.test/t/click/tok?u=a&b".into()),
      }],
      links:           vec!["https://ref.test/".into()],
      open_pixel_url:  Some("https://t.test/t/open/tok.png".into()),
      unsubscribe_url: "https://t.test/unsubscribe/tok".into(),
    }
  }

  #[test]
  fn html_is_escaped_and_tracked() {
    let msg = HtmlRenderer.render(&ctx()).unwrap();
    assert!(msg.html.contains("<h1>Daily &lt;Brief&gt;</h1>"));
    assert!(msg.html.contains("Fish &amp; chips"));
    assert!(msg.html.contains(r#"href="https://t.test/t/click/tok?u=a&amp;b""#));
    assert!(msg.html.contains(r#"<img src="https://t.test/t/open/tok.png""#));
    assert!(msg.html.contains("https://t.test/unsubscribe/tok"));
  }

  #[test]
  fn text_lists_items_and_links() {
    let msg = HtmlRenderer.render(&ctx()).unwrap();
    assert_eq!(msg.subject, "Daily: 2024-06-01 to 2024-06-03");
    assert!(msg.text.starts_with("Daily: 2024-06-01 to 2024-06-03\n\nHello Ada,\n"));
    assert!(msg.text.contains("1. Fish & chips\n   Tasty.\n   https://t.test/t/click/tok?u=a&b\n"));
    assert!(msg.text.contains("Links:\n- https://ref.test/\n"));
    assert!(msg.text.ends_with("Unsubscribe: https://t.test/unsubscribe/tok"));
    assert!(!msg.text.contains("open/tok.png"));
  }

  #[test]
  fn empty_run_still_renders() {
    let mut c = ctx();
    c.items.clear();
    c.links.clear();
    c.open_pixel_url = None;
    let msg = HtmlRenderer.render(&c).unwrap();
    assert!(msg.text.contains("Nothing new this period."));
    assert!(!msg.html.contains("<img"));
  }
}
