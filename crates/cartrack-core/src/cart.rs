//! The cart aggregate: "the cart right now" for one session.
//!
//! An aggregate is built either from the platform's live cart or, when the
//! triggering event carries no live cart, from the single item that was just
//! added. It resolves its durable id lazily, persists with a replace-all
//! write of its items, and produces the [`CartSnapshot`] handed to the
//! publisher.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  attribution::EmailSource,
  publish::{CartAction, CartEvent, Publisher},
  session::SessionHandle,
  store::{CartHeader, CartRecord, CartStore, ItemRow, NewCart},
};

// ─── Identity & status ───────────────────────────────────────────────────────

/// Durable identifier of a cart, generated by the store.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CartId(pub i64);

impl fmt::Display for CartId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CartStatus {
  #[default]
  #[serde(rename = "in-process")]
  InProcess,
  #[serde(rename = "ordered")]
  Ordered,
}

// ─── Platform inputs ─────────────────────────────────────────────────────────

/// One line of the platform's live cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveCartLine {
  pub key:               String,
  pub product_id:        i64,
  pub quantity:          i64,
  #[serde(default)]
  pub line_subtotal:     Decimal,
  #[serde(default)]
  pub line_subtotal_tax: Decimal,
  #[serde(default)]
  pub line_total:        Decimal,
  #[serde(default)]
  pub line_tax:          Decimal,
}

/// The platform's cart object as seen by the triggering request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveCart {
  #[serde(default)]
  pub lines: Vec<LiveCartLine>,
  /// Grand total as computed by the platform.
  #[serde(default)]
  pub total: Decimal,
}

/// A registered platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id:    i64,
  pub email: String,
}

/// The parts of a platform order the engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
  pub id:            i64,
  pub billing_email: String,
  /// The account that placed the order, if it was not a guest checkout.
  #[serde(default)]
  pub user:          Option<User>,
}

/// Who is making the current request, as recorded on cart headers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requester {
  #[serde(default)]
  pub user_id:    Option<i64>,
  #[serde(default)]
  pub ip_address: String,
}

// ─── Items ───────────────────────────────────────────────────────────────────

/// A line of the aggregate. Monetary fields are copied verbatim from the live
/// cart and are zero for a synthetic item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
  pub key:               String,
  pub product_id:        i64,
  pub quantity:          i64,
  pub line_subtotal:     Decimal,
  pub line_subtotal_tax: Decimal,
  pub line_total:        Decimal,
  pub line_tax:          Decimal,
}

impl CartItem {
  pub fn new(key: impl Into<String>, product_id: i64, quantity: i64) -> Self {
    Self {
      key: key.into(),
      product_id,
      quantity,
      line_subtotal: Decimal::ZERO,
      line_subtotal_tax: Decimal::ZERO,
      line_total: Decimal::ZERO,
      line_tax: Decimal::ZERO,
    }
  }

  fn to_row(&self) -> ItemRow {
    ItemRow {
      item_key:   self.key.clone(),
      product_id: self.product_id,
      quantity:   self.quantity,
    }
  }
}

impl From<&LiveCartLine> for CartItem {
  fn from(line: &LiveCartLine) -> Self {
    Self {
      key:               line.key.clone(),
      product_id:        line.product_id,
      quantity:          line.quantity,
      line_subtotal:     line.line_subtotal,
      line_subtotal_tax: line.line_subtotal_tax,
      line_total:        line.line_total,
      line_tax:          line.line_tax,
    }
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Who the cart is believed to belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
  #[serde(rename = "email_address")]
  pub email:       String,
  pub source:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_id: Option<i64>,
}

impl CustomerDetails {
  const UNKNOWN: &'static str = "unknown";

  pub fn unknown() -> Self {
    Self {
      email:       Self::UNKNOWN.to_owned(),
      source:      Self::UNKNOWN.to_owned(),
      customer_id: None,
    }
  }
}

/// The serialised view of an aggregate handed to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
  pub id:               CartId,
  pub session_id:       Uuid,
  pub customer_details: CustomerDetails,
  pub order_total:      Decimal,
  pub coupons:          Vec<String>,
  pub captured_by:      String,
  pub cart_status:      CartStatus,
  pub items:            Vec<CartItem>,
  pub order_id:         Option<i64>,
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

pub struct CartAggregate<'a, S> {
  session:     &'a SessionHandle<S>,
  requester:   &'a Requester,
  id:          Option<CartId>,
  items:       Vec<CartItem>,
  status:      CartStatus,
  order:       Option<Order>,
  order_id:    Option<i64>,
  order_total: Decimal,
}

impl<'a, S: CartStore> CartAggregate<'a, S> {
  fn empty(session: &'a SessionHandle<S>, requester: &'a Requester) -> Self {
    Self {
      session,
      requester,
      id: None,
      items: Vec::new(),
      status: CartStatus::InProcess,
      order: None,
      order_id: None,
      order_total: Decimal::ZERO,
    }
  }

  /// One item per line of the live cart, monetary fields copied verbatim.
  pub fn from_live_cart(
    session: &'a SessionHandle<S>,
    requester: &'a Requester,
    live: &LiveCart,
  ) -> Self {
    let mut cart = Self::empty(session, requester);
    cart.order_total = live.total;
    for line in &live.lines {
      cart.add_item(CartItem::from(line));
    }
    cart
  }

  /// A one-item cart for an add-to-cart event that carried no live cart.
  pub fn from_added_item(
    session: &'a SessionHandle<S>,
    requester: &'a Requester,
    key: impl Into<String>,
    product_id: i64,
    quantity: i64,
  ) -> Self {
    let mut cart = Self::empty(session, requester);
    cart.add_item(CartItem::new(key, product_id, quantity));
    cart
  }

  /// The cart as last persisted. Stored rows carry no money, so items and
  /// the total are zero-valued; status and order id come from the header.
  pub fn from_stored(
    session: &'a SessionHandle<S>,
    requester: &'a Requester,
    record: &CartRecord,
    rows: Vec<ItemRow>,
  ) -> Self {
    let mut cart = Self::empty(session, requester);
    cart.id = Some(record.id);
    cart.status = record.status();
    cart.order_id = record.order_id;
    for row in rows {
      cart.add_item(CartItem::new(row.item_key, row.product_id, row.quantity));
    }
    cart
  }

  pub fn add_item(&mut self, item: CartItem) { self.items.push(item); }

  /// Attach the order this cart turned into. One-way: the cart is
  /// `ordered` from here on.
  pub fn set_order(&mut self, order: Order) {
    self.order_id = Some(order.id);
    self.order = Some(order);
    self.status = CartStatus::Ordered;
  }

  pub fn items(&self) -> &[CartItem] { &self.items }

  pub fn status(&self) -> CartStatus { self.status }

  /// The durable id: the session's current cart if there is one, otherwise
  /// a newly inserted cart that becomes the session's current cart.
  /// Computed once per aggregate.
  pub async fn cart_id(&mut self) -> Result<CartId> {
    if let Some(id) = self.id {
      return Ok(id);
    }

    let id = match self.session.current_cart_id().await? {
      Some(id) => id,
      None => {
        let session_id = self.session.session_id().await?;
        let id = self
          .store()
          .insert_cart(NewCart {
            session_id,
            user_id: self.requester.user_id,
            ip_address: self.requester.ip_address.clone(),
          })
          .await
          .map_err(Error::store)?;
        self.session.set_current_cart_id(Some(id)).await?;
        tracing::debug!(%session_id, cart_id = %id, "started new cart");
        id
      }
    };

    self.id = Some(id);
    Ok(id)
  }

  /// Rewrite the cart header, then replace the full item set.
  pub async fn persist(&mut self) -> Result<CartId> {
    let id = self.cart_id().await?;

    let header = CartHeader {
      user_id:    self.requester.user_id,
      ip_address: self.requester.ip_address.clone(),
      order_id:   self.order_id,
    };
    self
      .store()
      .update_cart(id, header)
      .await
      .map_err(Error::store)?;

    let rows = self.items.iter().map(CartItem::to_row).collect();
    self
      .store()
      .replace_cart_items(id, rows)
      .await
      .map_err(Error::store)?;

    tracing::debug!(cart_id = %id, items = self.items.len(), "cart persisted");
    Ok(id)
  }

  /// Resolve who the cart belongs to; the first matching rule wins.
  pub async fn customer_details(&self) -> Result<CustomerDetails> {
    if let Some(order) = &self.order {
      return Ok(match &order.user {
        Some(user) => CustomerDetails {
          email:       user.email.clone(),
          source:      EmailSource::Order.as_str().to_owned(),
          customer_id: Some(user.id),
        },
        None => CustomerDetails {
          email:       order.billing_email.clone(),
          source:      EmailSource::Order.as_str().to_owned(),
          customer_id: None,
        },
      });
    }

    Ok(match self.session.email().await? {
      Some(attribution) => CustomerDetails {
        email:       attribution.email.into_inner(),
        source:      attribution.source.as_str().to_owned(),
        customer_id: None,
      },
      None => CustomerDetails::unknown(),
    })
  }

  pub async fn to_snapshot(&mut self) -> Result<CartSnapshot> {
    let id = self.cart_id().await?;
    Ok(CartSnapshot {
      id,
      session_id: self.session.session_id().await?,
      customer_details: self.customer_details().await?,
      order_total: self.order_total,
      coupons: Vec::new(),
      captured_by: "unknown".to_owned(),
      cart_status: self.status,
      items: self.items.clone(),
      order_id: self.order_id,
    })
  }

  /// Announce the current snapshot to every listener as `updated`.
  pub async fn push_update(&mut self, publisher: &Publisher) -> Result<CartId> {
    let snapshot = self.to_snapshot().await?;
    let event = CartEvent {
      cart_id: snapshot.id,
      snapshot,
      action: CartAction::Updated,
    };
    publisher.publish(&event);
    Ok(event.cart_id)
  }

  fn store(&self) -> &S { self.session.store() }
}
