//! In-process fan-out of cart change announcements.
//!
//! The publisher's contract ends at handing a well-formed [`CartEvent`] to
//! each listener, synchronously and in registration order. Delivery beyond
//! the process (webhooks) is a listener's own business.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::cart::{CartId, CartSnapshot};

/// What happened to the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartAction {
  Updated,
}

impl CartAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Updated => "updated",
    }
  }
}

/// The single outbound event: a cart snapshot tagged with an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEvent {
  pub cart_id:  CartId,
  pub snapshot: CartSnapshot,
  pub action:   CartAction,
}

/// A subscriber to cart events. Implementations must not block; anything
/// slow belongs on a spawned task.
pub trait CartListener: Send + Sync {
  fn on_cart_event(&self, event: &CartEvent);
}

impl<F> CartListener for F
where
  F: Fn(&CartEvent) + Send + Sync,
{
  fn on_cart_event(&self, event: &CartEvent) { self(event) }
}

/// Cloning is cheap; listeners are reference-counted.
#[derive(Clone, Default)]
pub struct Publisher {
  listeners: Vec<Arc<dyn CartListener>>,
}

impl Publisher {
  pub fn new() -> Self { Self::default() }

  pub fn subscribe(&mut self, listener: Arc<dyn CartListener>) { self.listeners.push(listener); }

  pub fn with_listener(mut self, listener: impl CartListener + 'static) -> Self {
    self.subscribe(Arc::new(listener));
    self
  }

  pub fn publish(&self, event: &CartEvent) {
    tracing::debug!(
      cart_id = %event.cart_id,
      action = event.action.as_str(),
      listeners = self.listeners.len(),
      "publishing cart event"
    );
    for listener in &self.listeners {
      listener.on_cart_event(event);
    }
  }
}

impl fmt::Debug for Publisher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Publisher")
      .field("listeners", &self.listeners.len())
      .finish()
  }
}
