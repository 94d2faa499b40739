//! Email address type.
//!
//! Validation follows the storefront platform's own notion of a "valid email"
//! so that an address the platform would accept in a form is also accepted
//! here, and nothing looser.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
  #[error("email cannot be empty")]
  Empty,
  #[error("email must be between {min} and {max} characters")]
  Length { min: usize, max: usize },
  #[error("email must contain an @ symbol after the first character")]
  MissingAtSymbol,
  #[error("email local part contains invalid characters")]
  InvalidLocalPart,
  #[error("email domain is invalid")]
  InvalidDomain,
}

/// A syntactically valid email address.
///
/// ## Constraints
///
/// - Length: 6-254 characters
/// - An `@` that is not the first character; the first `@` splits local part
///   and domain
/// - Local part: letters, digits and ``!#$%&'*+/=?^_`{|}~.-``
/// - Domain: at least two dot-separated labels of letters, digits and inner
///   hyphens; no empty labels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
  pub const MIN_LENGTH: usize = 6;
  /// Maximum length of an email address (RFC 5321).
  pub const MAX_LENGTH: usize = 254;

  /// Parse an `Email` from a string, without trimming or case folding.
  pub fn parse(s: &str) -> Result<Self, EmailError> {
    if s.is_empty() {
      return Err(EmailError::Empty);
    }

    if s.len() < Self::MIN_LENGTH || s.len() > Self::MAX_LENGTH {
      return Err(EmailError::Length {
        min: Self::MIN_LENGTH,
        max: Self::MAX_LENGTH,
      });
    }

    let (local, domain) = match s.split_once('@') {
      Some((local, domain)) if !local.is_empty() => (local, domain),
      _ => return Err(EmailError::MissingAtSymbol),
    };

    if !local.chars().all(is_local_char) {
      return Err(EmailError::InvalidLocalPart);
    }

    if !is_valid_domain(domain) {
      return Err(EmailError::InvalidDomain);
    }

    Ok(Self(s.to_owned()))
  }

  /// Whether `s` would parse as an [`Email`].
  pub fn is_valid(s: &str) -> bool { Self::parse(s).is_ok() }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn into_inner(self) -> String { self.0 }
}

fn is_local_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c)
}

fn is_valid_domain(domain: &str) -> bool {
  if domain.contains("..") {
    return false;
  }

  let trimmed = domain.trim_matches(|c: char| c == '.' || c == '-' || c.is_whitespace());
  if trimmed != domain {
    return false;
  }

  let labels: Vec<&str> = domain.split('.').collect();
  if labels.len() < 2 {
    return false;
  }

  labels.iter().all(|label| {
    !label.is_empty()
      && !label.starts_with('-')
      && !label.ends_with('-')
      && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
  })
}

impl fmt::Display for Email {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl std::str::FromStr for Email {
  type Err = EmailError;

  fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for Email {
  type Error = EmailError;

  fn try_from(s: String) -> Result<Self, Self::Error> { Self::parse(&s) }
}

impl From<Email> for String {
  fn from(email: Email) -> Self { email.0 }
}

impl AsRef<str> for Email {
  fn as_ref(&self) -> &str { &self.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_common_addresses() {
    assert!(Email::is_valid("user@example.com"));
    assert!(Email::is_valid("user.name+tag@example.co.uk"));
    assert!(Email::is_valid("p@q.com"));
    assert!(Email::is_valid("o'brien@sub.example.org"));
  }

  #[test]
  fn rejects_structural_problems() {
    assert_eq!(Email::parse(""), Err(EmailError::Empty));
    assert!(matches!(Email::parse("a@b.c"), Err(EmailError::Length { .. })));
    assert_eq!(
      Email::parse("no-at-symbol"),
      Err(EmailError::MissingAtSymbol)
    );
    assert_eq!(
      Email::parse("@domain.com"),
      Err(EmailError::MissingAtSymbol)
    );
    assert_eq!(
      Email::parse("us er@example.com"),
      Err(EmailError::InvalidLocalPart)
    );
  }

  #[test]
  fn rejects_bad_domains() {
    for bad in [
      "user@localhost",
      "user@example..com",
      "user@.example.com",
      "user@example.com.",
      "user@-example.com",
      "user@exa_mple.com",
      "user@a@b.com",
    ] {
      assert_eq!(Email::parse(bad), Err(EmailError::InvalidDomain), "{bad}");
    }
  }

  #[test]
  fn serde_is_transparent_and_validating() {
    let email = Email::parse("user@example.com").unwrap();
    let json = serde_json::to_string(&email).unwrap();
    assert_eq!(json, "\"user@example.com\"");

    let parsed: Email = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, email);

    assert!(serde_json::from_str::<Email>("\"not-an-email\"").is_err());
  }
}
