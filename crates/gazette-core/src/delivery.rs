//! Delivery policy and the [`Mailer`] seam.

use std::future::Future;

use crate::{model::GroupMember, render::RenderedMessage};

/// Failed deliveries, across all runs, after which a recipient is disabled.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Whether a recipient with `failures` failed deliveries must be disabled
/// under `threshold`.
pub fn should_disable(failures: u32, threshold: u32) -> bool { failures >= threshold }

/// Members the dispatch loop may deliver to, in membership order.
pub fn eligible(members: &[GroupMember]) -> impl Iterator<Item = &GroupMember> {
  members.iter().filter(|m| m.is_eligible())
}

/// A rendered message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
  pub to:      String,
  pub to_name: Option<String>,
  pub subject: String,
  pub html:    String,
  pub text:    String,
}

impl OutgoingMessage {
  pub fn new(to: impl Into<String>, to_name: Option<String>, body: RenderedMessage) -> Self {
    Self {
      to: to.into(),
      to_name,
      subject: body.subject,
      html: body.html,
      text: body.text,
    }
  }
}

/// A failed send. Recorded on the delivery, never retried in-process.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MailError(pub String);

impl MailError {
  pub fn new(err: impl std::fmt::Display) -> Self { Self(err.to_string()) }
}

/// Hands a message to the delivery backend and returns the backend's message
/// id.
pub trait Mailer: Send + Sync {
  fn send<'a>(
    &'a self,
    message: &'a OutgoingMessage,
  ) -> impl Future<Output = Result<String, MailError>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Recipient;

  #[test]
  fn third_failure_disables() {
    assert!(!should_disable(0, FAILURE_THRESHOLD));
    assert!(!should_disable(2, FAILURE_THRESHOLD));
    assert!(should_disable(3, FAILURE_THRESHOLD));
    assert!(should_disable(4, FAILURE_THRESHOLD));
    assert!(should_disable(1, 1));
  }

  #[test]
  fn eligibility_filters_inactive_members() {
    let member = |email: &str, enabled, unsubscribed, membership_enabled| GroupMember {
      recipient: Recipient {
        email: email.into(),
        name: None,
        enabled,
        unsubscribed,
      },
      membership_enabled,
    };
    let members = vec![
      member("a@x.test", true, false, true),
      member("b@x.test", false, false, true),
      member("c@x.test", true, true, true),
      member("d@x.test", true, false, false),
      member("e@x.test", true, false, true),
    ];
    let emails: Vec<_> = eligible(&members).map(|m| m.recipient.email.as_str()).collect();
    assert_eq!(emails, vec!["a@x.test", "e@x.test"]);
  }
}
