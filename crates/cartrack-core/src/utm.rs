//! Marketing parameter capture and the order-metadata replay that goes with
//! it.

use base64::{
  Engine as _,
  engine::general_purpose::{STANDARD, URL_SAFE},
};

use crate::email::Email;

/// Query parameters recorded per session.
pub const PARAMETER_NAMES: [&str; 7] = [
  "utm_campaign",
  "utm_source",
  "utm_medium",
  "utm_content",
  "utm_id",
  "utm_term",
  ADDRESS_PARAM,
];

/// Carries a base64-encoded email address from outbound campaign links.
pub const ADDRESS_PARAM: &str = "address";

/// Prefix of the order metadata keys written on replay.
pub const ORDER_META_PREFIX: &str = "_bo_";

/// Set on an order once its parameters have been replayed.
pub const REPLAY_FLAG: &str = "_bo_thankyou_action_done";

/// The tracked parameters present in `query` with a non-empty value. A
/// repeated key yields its last value.
pub fn extract(query: &[(String, String)]) -> Vec<(&'static str, String)> {
  PARAMETER_NAMES
    .iter()
    .filter_map(|&name| {
      query
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .filter(|(_, value)| !value.is_empty())
        .map(|(_, value)| (name, value.clone()))
    })
    .collect()
}

/// Decode an `address` value. Standard and URL-safe alphabets are accepted;
/// the result must be valid UTF-8 and a valid email.
pub fn decode_address(raw: &str) -> Option<Email> {
  let raw = raw.trim();
  let bytes = STANDARD.decode(raw).or_else(|_| URL_SAFE.decode(raw)).ok()?;
  let text = String::from_utf8(bytes).ok()?;
  Email::parse(&text).ok()
}

pub fn order_meta_key(name: &str) -> String { format!("{ORDER_META_PREFIX}{name}") }
