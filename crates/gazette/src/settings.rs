//! Runtime settings and catalog loading.
//!
//! Settings come from an optional TOML file overlaid by `GAZETTE__*`
//! environment variables (`__` separates nesting levels, so
//! `GAZETTE__TRACKING__SECRET` sets `tracking.secret`). The catalog is a
//! separate TOML or JSON file describing sources, groups, templates, and
//! digests.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use gazette_core::catalog::Catalog;
use serde::Deserialize;

use crate::Result;

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_store_path")]
  pub store_path:     PathBuf,
  #[serde(default = "default_catalog_path")]
  pub catalog_path:   PathBuf,
  /// Public base URL the tracking endpoints are reachable at.
  #[serde(default = "default_app_base_url")]
  pub app_base_url:   String,
  /// Zone used by digests whose send policy names none.
  #[serde(default = "default_timezone")]
  pub timezone:       Tz,
  #[serde(default = "default_retention_days")]
  pub retention_days: u32,
  #[serde(default)]
  pub tracking:       TrackingSettings,
  #[serde(default)]
  pub summary:        SummarySettings,
  #[serde(default)]
  pub mail:           MailSettings,
  #[serde(default)]
  pub fetch:          FetchSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSettings {
  #[serde(default)]
  pub secret: String,
  #[serde(default = "default_host")]
  pub host:   String,
  #[serde(default = "default_port")]
  pub port:   u16,
}

impl Default for TrackingSettings {
  fn default() -> Self {
    Self { secret: String::new(), host: default_host(), port: default_port() }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryProvider {
  #[default]
  None,
  Ollama,
  OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarySettings {
  #[serde(default)]
  pub provider:        SummaryProvider,
  #[serde(default = "default_ollama_base_url")]
  pub ollama_base_url: String,
  #[serde(default = "default_ollama_model")]
  pub ollama_model:    String,
  #[serde(default)]
  pub openai_api_key:  Option<String>,
  #[serde(default = "default_openai_base_url")]
  pub openai_base_url: String,
  #[serde(default = "default_openai_model")]
  pub openai_model:    String,
  #[serde(default = "default_summary_timeout")]
  pub timeout_secs:    u64,
}

impl Default for SummarySettings {
  fn default() -> Self {
    Self {
      provider:        SummaryProvider::None,
      ollama_base_url: default_ollama_base_url(),
      ollama_model:    default_ollama_model(),
      openai_api_key:  None,
      openai_base_url: default_openai_base_url(),
      openai_model:    default_openai_model(),
      timeout_secs:    default_summary_timeout(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
  Smtp,
  #[default]
  Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
  #[serde(default)]
  pub transport:     MailTransport,
  #[serde(default = "default_sender")]
  pub sender:        String,
  #[serde(default)]
  pub smtp_host:     String,
  #[serde(default = "default_smtp_port")]
  pub smtp_port:     u16,
  #[serde(default)]
  pub smtp_username: Option<String>,
  #[serde(default)]
  pub smtp_password: Option<String>,
}

impl Default for MailSettings {
  fn default() -> Self {
    Self {
      transport:     MailTransport::default(),
      sender:        default_sender(),
      smtp_host:     String::new(),
      smtp_port:     default_smtp_port(),
      smtp_username: None,
      smtp_password: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FetchSettings {
  #[serde(default = "default_fetch_timeout")]
  pub timeout_secs:     u64,
  #[serde(default = "default_max_attempts")]
  pub max_attempts:     u32,
  #[serde(default = "default_backoff_min")]
  pub backoff_min_secs: u64,
  #[serde(default = "default_backoff_max")]
  pub backoff_max_secs: u64,
}

impl Default for FetchSettings {
  fn default() -> Self {
    Self {
      timeout_secs:     default_fetch_timeout(),
      max_attempts:     default_max_attempts(),
      backoff_min_secs: default_backoff_min(),
      backoff_max_secs: default_backoff_max(),
    }
  }
}

impl Settings {
  /// Read `path` (if it exists) and overlay the `GAZETTE__*` environment.
  pub fn load(path: &Path) -> Result<Self> {
    let settings = Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(
        Environment::with_prefix("GAZETTE")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()?;
    Ok(settings)
  }

  /// Parse settings from TOML text alone.
  pub fn from_toml(text: &str) -> Result<Self> {
    let settings = Config::builder()
      .add_source(File::from_str(text, FileFormat::Toml))
      .build()?
      .try_deserialize()?;
    Ok(settings)
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn catalog_path(&self) -> PathBuf { expand_tilde(&self.catalog_path) }

  pub fn tracking_address(&self) -> String {
    format!("{}:{}", self.tracking.host, self.tracking.port)
  }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Load the catalog; the format follows the file extension.
pub fn load_catalog(path: &Path) -> Result<Catalog> {
  let catalog = Config::builder()
    .add_source(File::from(path))
    .build()?
    .try_deserialize()?;
  Ok(catalog)
}

pub fn parse_catalog(text: &str, format: FileFormat) -> Result<Catalog> {
  let catalog = Config::builder()
    .add_source(File::from_str(text, format))
    .build()?
    .try_deserialize()?;
  Ok(catalog)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

fn default_store_path() -> PathBuf { PathBuf::from("gazette.db") }
fn default_catalog_path() -> PathBuf { PathBuf::from("catalog.toml") }
fn default_app_base_url() -> String { "http://127.0.0.1:8088".to_owned() }
fn default_timezone() -> Tz { Tz::UTC }
fn default_retention_days() -> u32 { 45 }
fn default_host() -> String { "127.0.0.1".to_owned() }
fn default_port() -> u16 { 8088 }
fn default_ollama_base_url() -> String { "http://127.0.0.1:11434".to_owned() }
fn default_ollama_model() -> String { "llama3.1".to_owned() }
fn default_openai_base_url() -> String { "https://api.openai.com/v1".to_owned() }
fn default_openai_model() -> String { "gpt-4.1-mini".to_owned() }
fn default_summary_timeout() -> u64 { 60 }
fn default_sender() -> String { "Gazette <gazette@localhost>".to_owned() }
fn default_smtp_port() -> u16 { 587 }
fn default_fetch_timeout() -> u64 { 20 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_min() -> u64 { 2 }
fn default_backoff_max() -> u64 { 10 }
