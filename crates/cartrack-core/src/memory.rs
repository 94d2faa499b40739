//! [`MemoryStore`], an in-process [`CartStore`] backed by plain maps.
//!
//! Used by tests throughout the workspace and by the server when configured
//! with `store_path = ":memory:"`. Nothing survives a restart.

use std::{
  collections::{BTreeMap, HashMap},
  convert::Infallible,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
  attribution::Attribution,
  cart::CartId,
  store::{CartHeader, CartRecord, CartStore, ItemRow, NewCart, Session, UtmDatum},
};

#[derive(Default)]
struct Tables {
  sessions:        HashMap<Uuid, Session>,
  session_inserts: usize,
  session_reads:   usize,
  carts:           BTreeMap<CartId, CartRecord>,
  next_cart_id:    i64,
  /// Keyed by `(cart_id, item_key)`, mirroring the unique index.
  items:           BTreeMap<(CartId, String), ItemRow>,
  /// Keyed by `(session_id, name)`.
  utm:             BTreeMap<(Uuid, String), UtmDatum>,
  order_meta:      BTreeMap<(i64, String), String>,
}

/// Cloning is cheap; all clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Tables> {
    self.tables.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Number of session rows ever inserted.
  pub fn session_inserts(&self) -> usize { self.lock().session_inserts }

  /// Number of `get_session` calls served.
  pub fn session_reads(&self) -> usize { self.lock().session_reads }

  pub fn cart_count(&self) -> usize { self.lock().carts.len() }
}

impl CartStore for MemoryStore {
  type Error = Infallible;

  async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, Infallible> {
    let mut tables = self.lock();
    tables.session_reads += 1;
    Ok(tables.sessions.get(&session_id).cloned())
  }

  async fn insert_session(&self, session_id: Uuid) -> Result<Session, Infallible> {
    let mut tables = self.lock();
    if let Some(existing) = tables.sessions.get(&session_id) {
      return Ok(existing.clone());
    }

    let now = Utc::now();
    let session = Session {
      session_id,
      created_at: now,
      last_seen: now,
      current_cart_id: None,
      attribution: None,
    };
    tables.sessions.insert(session_id, session.clone());
    tables.session_inserts += 1;
    Ok(session)
  }

  async fn touch_session(&self, session_id: Uuid) -> Result<bool, Infallible> {
    Ok(match self.lock().sessions.get_mut(&session_id) {
      Some(session) => {
        session.last_seen = Utc::now();
        true
      }
      None => false,
    })
  }

  async fn set_current_cart(
    &self,
    session_id: Uuid,
    cart_id: Option<CartId>,
  ) -> Result<(), Infallible> {
    if let Some(session) = self.lock().sessions.get_mut(&session_id) {
      session.current_cart_id = cart_id;
      session.last_seen = Utc::now();
    }
    Ok(())
  }

  async fn set_attribution(
    &self,
    session_id: Uuid,
    attribution: Attribution,
  ) -> Result<(), Infallible> {
    if let Some(session) = self.lock().sessions.get_mut(&session_id) {
      session.attribution = Some(attribution);
      session.last_seen = Utc::now();
    }
    Ok(())
  }

  async fn insert_cart(&self, cart: NewCart) -> Result<CartId, Infallible> {
    let mut tables = self.lock();
    tables.next_cart_id += 1;
    let id = CartId(tables.next_cart_id);
    tables.carts.insert(id, CartRecord {
      id,
      time: Utc::now(),
      session_id: cart.session_id,
      user_id: cart.user_id,
      ip_address: cart.ip_address,
      order_id: None,
    });
    Ok(id)
  }

  async fn update_cart(&self, cart_id: CartId, header: CartHeader) -> Result<(), Infallible> {
    if let Some(cart) = self.lock().carts.get_mut(&cart_id) {
      cart.time = Utc::now();
      cart.user_id = header.user_id;
      cart.ip_address = header.ip_address;
      cart.order_id = header.order_id;
    }
    Ok(())
  }

  async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartRecord>, Infallible> {
    Ok(self.lock().carts.get(&cart_id).cloned())
  }

  async fn replace_cart_items(
    &self,
    cart_id: CartId,
    items: Vec<ItemRow>,
  ) -> Result<(), Infallible> {
    let mut tables = self.lock();
    tables.items.retain(|(id, _), _| *id != cart_id);
    for item in items {
      tables.items.insert((cart_id, item.item_key.clone()), item);
    }
    Ok(())
  }

  async fn get_cart_items(&self, cart_id: CartId) -> Result<Vec<ItemRow>, Infallible> {
    Ok(
      self
        .lock()
        .items
        .range((cart_id, String::new())..)
        .take_while(|((id, _), _)| *id == cart_id)
        .map(|(_, item)| item.clone())
        .collect(),
    )
  }

  async fn upsert_utm(
    &self,
    session_id: Uuid,
    name: String,
    value: String,
  ) -> Result<(), Infallible> {
    self
      .lock()
      .utm
      .entry((session_id, name.clone()))
      .and_modify(|datum| datum.value.clone_from(&value))
      .or_insert_with(|| UtmDatum {
        session_id,
        name,
        value: value.clone(),
        time: Utc::now(),
      });
    Ok(())
  }

  async fn list_utm(&self, session_id: Uuid) -> Result<Vec<UtmDatum>, Infallible> {
    Ok(
      self
        .lock()
        .utm
        .values()
        .filter(|datum| datum.session_id == session_id)
        .cloned()
        .collect(),
    )
  }

  async fn replay_order_meta(
    &self,
    order_id: i64,
    flag: &'static str,
    entries: Vec<(String, String)>,
  ) -> Result<bool, Infallible> {
    let mut tables = self.lock();
    if tables.order_meta.contains_key(&(order_id, flag.to_owned())) {
      return Ok(false);
    }
    for (name, value) in entries {
      tables.order_meta.insert((order_id, name), value);
    }
    tables.order_meta.insert((order_id, flag.to_owned()), "1".to_owned());
    Ok(true)
  }

  async fn order_meta(&self, order_id: i64) -> Result<Vec<(String, String)>, Infallible> {
    Ok(
      self
        .lock()
        .order_meta
        .iter()
        .filter(|((id, _), _)| *id == order_id)
        .map(|((_, name), value)| (name.clone(), value.clone()))
        .collect(),
    )
  }

  async fn purge(&self) -> Result<(), Infallible> {
    *self.lock() = Tables::default();
    Ok(())
  }
}
