//! Attribution sources and the overwrite rule between them.
//!
//! A session is either unattributed or attributed to an `(email, source)`
//! pair. When a new claim arrives, [`should_update`] decides whether it
//! replaces the current one. The rule is a fixed table of which sources may
//! not override which. It is not a total order.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::email::Email;

// ─── Source ──────────────────────────────────────────────────────────────────

/// The channel that claimed to know a session's email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(from = "String", into = "String")]
pub enum EmailSource {
  /// A signed-in platform account.
  LoggedInUser,
  /// The email field of the checkout form.
  Checkout,
  /// Any request parameter whose key mentions "email".
  FormSubmit,
  /// A base64-encoded `address` parameter on a marketing link.
  BlueodinEmail,
  /// The billing email of a placed order.
  Order,
  /// A value read back from storage that is none of the above.
  #[strum(default)]
  Unrecognized(String),
}

impl EmailSource {
  /// Every source an adapter can produce.
  pub const KNOWN: [EmailSource; 5] = [
    EmailSource::LoggedInUser,
    EmailSource::Checkout,
    EmailSource::FormSubmit,
    EmailSource::BlueodinEmail,
    EmailSource::Order,
  ];

  /// Parse a stored source string. Never fails: anything outside the table
  /// becomes [`EmailSource::Unrecognized`].
  pub fn parse(s: &str) -> Self {
    Self::from_str(s).unwrap_or_else(|_| Self::Unrecognized(s.to_owned()))
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::LoggedInUser => "logged_in_user",
      Self::Checkout => "checkout",
      Self::FormSubmit => "form_submit",
      Self::BlueodinEmail => "blueodin_email",
      Self::Order => "order",
      Self::Unrecognized(raw) => raw,
    }
  }

  /// Sources that may not replace an attribution currently held by `self`.
  ///
  /// `None` means the source is outside the table.
  pub fn cannot_be_overridden_by(&self) -> Option<&'static [EmailSource]> {
    use EmailSource::*;

    const DURABLE: &[EmailSource] = &[LoggedInUser, FormSubmit, BlueodinEmail];
    const LOGIN: &[EmailSource] = &[FormSubmit, BlueodinEmail];
    const OPEN: &[EmailSource] = &[];

    match self {
      Order | Checkout => Some(DURABLE),
      LoggedInUser => Some(LOGIN),
      BlueodinEmail | FormSubmit => Some(OPEN),
      Unrecognized(_) => None,
    }
  }
}

impl fmt::Display for EmailSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl From<String> for EmailSource {
  fn from(s: String) -> Self { Self::parse(&s) }
}

impl From<EmailSource> for String {
  fn from(source: EmailSource) -> Self { source.as_str().to_owned() }
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// The `(email, source)` pair currently believed to identify a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
  pub email:  Email,
  pub source: EmailSource,
}

impl Attribution {
  pub fn new(email: Email, source: EmailSource) -> Self { Self { email, source } }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// Decide whether `proposed` should replace `current`.
///
/// - No current attribution: always accept.
/// - Identical email and source: reject, there is nothing to change.
/// - Otherwise accept unless the proposed source is listed as unable to
///   override the current one. An unrecognized current source is reported
///   and treated as overridable.
pub fn should_update(current: Option<&Attribution>, proposed: &Attribution) -> bool {
  let Some(current) = current else {
    return true;
  };

  if current == proposed {
    return false;
  }

  match current.source.cannot_be_overridden_by() {
    Some(blocked) => !blocked.contains(&proposed.source),
    None => {
      tracing::warn!(
        source = %current.source,
        "unknown email source on stored attribution; allowing override"
      );
      true
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use EmailSource::*;

  fn attr(email: &str, source: EmailSource) -> Attribution {
    Attribution::new(Email::parse(email).unwrap(), source)
  }

  /// `(current, proposed, allowed)` for every known pair.
  const TABLE: [(EmailSource, EmailSource, bool); 25] = [
    (Order, Order, true),
    (Order, BlueodinEmail, false),
    (Order, Checkout, true),
    (Order, FormSubmit, false),
    (Order, LoggedInUser, false),
    (BlueodinEmail, Order, true),
    (BlueodinEmail, BlueodinEmail, true),
    (BlueodinEmail, Checkout, true),
    (BlueodinEmail, FormSubmit, true),
    (BlueodinEmail, LoggedInUser, true),
    (Checkout, Order, true),
    (Checkout, BlueodinEmail, false),
    (Checkout, Checkout, true),
    (Checkout, FormSubmit, false),
    (Checkout, LoggedInUser, false),
    (FormSubmit, Order, true),
    (FormSubmit, BlueodinEmail, true),
    (FormSubmit, Checkout, true),
    (FormSubmit, FormSubmit, true),
    (FormSubmit, LoggedInUser, true),
    (LoggedInUser, Order, true),
    (LoggedInUser, BlueodinEmail, false),
    (LoggedInUser, Checkout, true),
    (LoggedInUser, FormSubmit, false),
    (LoggedInUser, LoggedInUser, true),
  ];

  #[test]
  fn precedence_table_matches_for_every_pair() {
    for (current, proposed, allowed) in TABLE {
      let cur = attr("old@example.com", current.clone());
      let new = attr("new@example.com", proposed.clone());
      assert_eq!(
        should_update(Some(&cur), &new),
        allowed,
        "{current} -> {proposed}"
      );
    }
  }

  #[test]
  fn unset_always_accepts() {
    for source in EmailSource::KNOWN {
      assert!(should_update(None, &attr("a@example.com", source)));
    }
  }

  #[test]
  fn identical_claim_is_rejected() {
    for source in EmailSource::KNOWN {
      let a = attr("a@example.com", source);
      assert!(!should_update(Some(&a), &a.clone()));
    }
  }

  #[test]
  fn same_email_from_stronger_source_is_accepted() {
    let cur = attr("a@example.com", FormSubmit);
    assert!(should_update(Some(&cur), &attr("a@example.com", Checkout)));
  }

  #[test]
  fn unrecognized_current_source_is_overridable() {
    let cur = attr("a@example.com", Unrecognized("newsletter".into()));
    for source in EmailSource::KNOWN {
      assert!(should_update(Some(&cur), &attr("b@example.com", source)));
    }
  }

  #[test]
  fn source_strings_round_trip() {
    for source in EmailSource::KNOWN {
      assert_eq!(EmailSource::parse(source.as_str()), source);
    }
    assert_eq!(
      EmailSource::parse("mystery"),
      Unrecognized("mystery".into())
    );
    assert_eq!(
      serde_json::to_string(&BlueodinEmail).unwrap(),
      "\"blueodin_email\""
    );
  }
}
