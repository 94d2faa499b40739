//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and UUIDs as hyphenated
//! lowercase strings. Cart ids are the table's integer rowid.

use cartrack_core::{
  attribution::{Attribution, EmailSource},
  cart::CartId,
  email::Email,
  store::{CartRecord, Session, UtmDatum},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// Split into the `(email, email_source)` column pair.
pub fn encode_attribution(a: &Attribution) -> (String, String) {
  (a.email.as_str().to_owned(), a.source.as_str().to_owned())
}

/// Both columns must be present for a session to count as attributed.
pub fn decode_attribution(
  email: Option<String>,
  source: Option<String>,
) -> Result<Option<Attribution>> {
  match (email, source) {
    (Some(email), Some(source)) => Ok(Some(Attribution::new(
      Email::parse(&email)?,
      EmailSource::parse(&source),
    ))),
    _ => Ok(None),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `sessions` row.
pub struct RawSession {
  pub session_id:      String,
  pub created_at:      String,
  pub last_seen:       String,
  pub current_cart_id: Option<i64>,
  pub email:           Option<String>,
  pub email_source:    Option<String>,
}

impl RawSession {
  pub const COLUMNS: &'static str =
    "session_id, created_at, last_seen, current_cart_id, email, email_source";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      session_id:      row.get(0)?,
      created_at:      row.get(1)?,
      last_seen:       row.get(2)?,
      current_cart_id: row.get(3)?,
      email:           row.get(4)?,
      email_source:    row.get(5)?,
    })
  }

  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      session_id:      decode_uuid(&self.session_id)?,
      created_at:      decode_dt(&self.created_at)?,
      last_seen:       decode_dt(&self.last_seen)?,
      current_cart_id: self.current_cart_id.map(CartId),
      attribution:     decode_attribution(self.email, self.email_source)?,
    })
  }
}

/// Raw values read directly from a `carts` row.
pub struct RawCart {
  pub id:         i64,
  pub time:       String,
  pub session_id: String,
  pub user_id:    Option<i64>,
  pub ip_address: String,
  pub order_id:   Option<i64>,
}

impl RawCart {
  pub const COLUMNS: &'static str = "id, time, session_id, user_id, ip_address, order_id";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      time:       row.get(1)?,
      session_id: row.get(2)?,
      user_id:    row.get(3)?,
      ip_address: row.get(4)?,
      order_id:   row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<CartRecord> {
    Ok(CartRecord {
      id:         CartId(self.id),
      time:       decode_dt(&self.time)?,
      session_id: decode_uuid(&self.session_id)?,
      user_id:    self.user_id,
      ip_address: self.ip_address,
      order_id:   self.order_id,
    })
  }
}

/// Raw values read directly from a `utm_data` row.
pub struct RawUtm {
  pub time:       String,
  pub session_id: String,
  pub name:       String,
  pub value:      String,
}

impl RawUtm {
  pub fn into_datum(self) -> Result<UtmDatum> {
    Ok(UtmDatum {
      session_id: decode_uuid(&self.session_id)?,
      name:       self.name,
      value:      self.value,
      time:       decode_dt(&self.time)?,
    })
  }
}
