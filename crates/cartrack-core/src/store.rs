//! The `CartStore` trait and the records it reads and writes.
//!
//! The trait is implemented by storage backends (`cartrack-store-sqlite`, and
//! [`crate::memory::MemoryStore`] for tests). Session handles, cart
//! aggregates and the engine depend on this abstraction, never on a concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  attribution::Attribution,
  cart::{CartId, CartStatus},
};

// ─── Records ─────────────────────────────────────────────────────────────────

/// A persisted session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub session_id:      Uuid,
  pub created_at:      DateTime<Utc>,
  pub last_seen:       DateTime<Utc>,
  pub current_cart_id: Option<CartId>,
  /// `None` iff both the email and source columns are null.
  pub attribution:     Option<Attribution>,
}

/// Input to [`CartStore::insert_cart`]. `time` is set by the store.
#[derive(Debug, Clone)]
pub struct NewCart {
  pub session_id: Uuid,
  pub user_id:    Option<i64>,
  pub ip_address: String,
}

/// Input to [`CartStore::update_cart`]. `time` is set by the store.
#[derive(Debug, Clone)]
pub struct CartHeader {
  pub user_id:    Option<i64>,
  pub ip_address: String,
  pub order_id:   Option<i64>,
}

/// A persisted cart header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRecord {
  pub id:         CartId,
  pub time:       DateTime<Utc>,
  pub session_id: Uuid,
  pub user_id:    Option<i64>,
  pub ip_address: String,
  pub order_id:   Option<i64>,
}

impl CartRecord {
  /// A cart becomes `ordered` once an order id has been written to it.
  pub fn status(&self) -> CartStatus {
    match self.order_id {
      Some(_) => CartStatus::Ordered,
      None => CartStatus::InProcess,
    }
  }
}

/// The durable part of a cart line: identity, product and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRow {
  pub item_key:   String,
  pub product_id: i64,
  pub quantity:   i64,
}

/// A marketing parameter captured for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmDatum {
  pub session_id: Uuid,
  pub name:       String,
  pub value:      String,
  pub time:       DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the engine's durable storage.
///
/// Every write replaces whole rows; there is no optimistic versioning, so
/// concurrent writers to the same row resolve as last-writer-wins.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait CartStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Sessions ──────────────────────────────────────────────────────────

  /// Retrieve a session by token. Returns `None` if not found.
  fn get_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send + '_;

  /// Insert a fresh, unattributed session row. Inserting a token that
  /// already exists leaves the existing row untouched and returns it.
  fn insert_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Session, Self::Error>> + Send + '_;

  /// Bump `last_seen`. Returns `false` if no such session exists.
  fn touch_session(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Point the session at `cart_id` (or detach it with `None`) and bump
  /// `last_seen`.
  fn set_current_cart(
    &self,
    session_id: Uuid,
    cart_id: Option<CartId>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Overwrite the session's attribution and bump `last_seen`. The decision
  /// whether to overwrite is made by the caller.
  fn set_attribution(
    &self,
    session_id: Uuid,
    attribution: Attribution,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Carts ─────────────────────────────────────────────────────────────

  /// Insert a cart header and return its generated id.
  fn insert_cart(
    &self,
    cart: NewCart,
  ) -> impl Future<Output = Result<CartId, Self::Error>> + Send + '_;

  /// Rewrite the header of an existing cart by primary key.
  fn update_cart(
    &self,
    cart_id: CartId,
    header: CartHeader,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_cart(
    &self,
    cart_id: CartId,
  ) -> impl Future<Output = Result<Option<CartRecord>, Self::Error>> + Send + '_;

  /// Delete every item row of `cart_id`, then write `items`. A key repeated
  /// within `items` keeps its last product id and quantity.
  fn replace_cart_items(
    &self,
    cart_id: CartId,
    items: Vec<ItemRow>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Item rows of `cart_id`, ordered by key.
  fn get_cart_items(
    &self,
    cart_id: CartId,
  ) -> impl Future<Output = Result<Vec<ItemRow>, Self::Error>> + Send + '_;

  // ── Marketing parameters ──────────────────────────────────────────────

  /// Insert or replace the value of `name` for `session_id`.
  fn upsert_utm(
    &self,
    session_id: Uuid,
    name: String,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// All captured parameters of a session, ordered by name.
  fn list_utm(
    &self,
    session_id: Uuid,
  ) -> impl Future<Output = Result<Vec<UtmDatum>, Self::Error>> + Send + '_;

  // ── Orders ────────────────────────────────────────────────────────────

  /// Record `entries` as metadata of `order_id` together with `flag`, unless
  /// `flag` is already present. Returns whether anything was written.
  fn replay_order_meta(
    &self,
    order_id: i64,
    flag: &'static str,
    entries: Vec<(String, String)>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Metadata recorded for `order_id`, ordered by name.
  fn order_meta(
    &self,
    order_id: i64,
  ) -> impl Future<Output = Result<Vec<(String, String)>, Self::Error>> + Send + '_;

  // ── Maintenance ───────────────────────────────────────────────────────

  /// Delete every row of every table (the uninstall sweep).
  fn purge(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
