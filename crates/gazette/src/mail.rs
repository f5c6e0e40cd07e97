//! Mail delivery backends.

use gazette_core::delivery::{MailError, Mailer, OutgoingMessage};
use lettre::{
  AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
  message::{Mailbox, MultiPart},
  transport::smtp::authentication::Credentials,
};
use uuid::Uuid;

use crate::{
  Error, Result,
  settings::{MailSettings, MailTransport},
};

// ─── SMTP ────────────────────────────────────────────────────────────────────

/// Sends over SMTP with STARTTLS. The generated `Message-ID` is returned as
/// the provider message id.
pub struct SmtpMailer {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  sender:    Mailbox,
}

impl std::fmt::Debug for SmtpMailer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SmtpMailer").field("sender", &self.sender).finish_non_exhaustive()
  }
}

impl SmtpMailer {
  pub fn new(settings: &MailSettings) -> Result<Self> {
    let sender: Mailbox = settings
      .sender
      .parse()
      .map_err(|e| Error::MailSetup(format!("invalid sender {:?}: {e}", settings.sender)))?;
    if settings.smtp_host.is_empty() {
      return Err(Error::MailSetup("mail.smtp_host is not set".to_owned()));
    }

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)
      .map_err(|e| Error::MailSetup(e.to_string()))?
      .port(settings.smtp_port);
    if let (Some(user), Some(pass)) = (&settings.smtp_username, &settings.smtp_password) {
      builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    Ok(Self { transport: builder.build(), sender })
  }
}

impl Mailer for SmtpMailer {
  async fn send(&self, message: &OutgoingMessage) -> Result<String, MailError> {
    let message_id = format!("<{}@{}>", Uuid::new_v4(), self.sender.email.domain());
    let email = build_message(&self.sender, message, &message_id)?;
    self.transport.send(email).await.map_err(MailError::new)?;
    Ok(message_id)
  }
}

/// A multipart/alternative (text then HTML) message.
fn build_message(
  sender:     &Mailbox,
  message:    &OutgoingMessage,
  message_id: &str,
) -> Result<Message, MailError> {
  let to = Mailbox::new(message.to_name.clone(), message.to.parse().map_err(MailError::new)?);
  Message::builder()
    .from(sender.clone())
    .to(to)
    .subject(message.subject.clone())
    .message_id(Some(message_id.to_owned()))
    .multipart(MultiPart::alternative_plain_html(
      message.text.clone(),
      message.html.clone(),
    ))
    .map_err(MailError::new)
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Logs each message instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
  async fn send(&self, message: &OutgoingMessage) -> Result<String, MailError> {
    let id = format!("log-{}", Uuid::new_v4());
    tracing::info!(
      recipient = %message.to,
      subject = %message.subject,
      message_id = %id,
      "message logged, not sent"
    );
    tracing::debug!(body = %message.text);
    Ok(id)
  }
}

// ─── Selection ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfiguredMailer {
  Smtp(SmtpMailer),
  Log(LogMailer),
}

impl ConfiguredMailer {
  pub fn from_settings(settings: &MailSettings) -> Result<Self> {
    Ok(match settings.transport {
      MailTransport::Smtp => Self::Smtp(SmtpMailer::new(settings)?),
      MailTransport::Log => Self::Log(LogMailer),
    })
  }
}

impl Mailer for ConfiguredMailer {
  async fn send(&self, message: &OutgoingMessage) -> Result<String, MailError> {
    match self {
      Self::Smtp(m) => m.send(message).await,
      Self::Log(m) => m.send(message).await,
    }
  }
}
