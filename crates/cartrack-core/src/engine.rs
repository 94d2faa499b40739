//! The engine: one adapter per platform event.
//!
//! Adapters receive the request's [`SessionHandle`], the [`Requester`] and
//! the trigger payload explicitly. Each is a short sequence of guard
//! clauses followed by attribution, persistence and publication.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
  Error, Result,
  attribution::EmailSource,
  cart::{CartAggregate, CartId, LiveCart, Order, Requester, User},
  email::Email,
  publish::Publisher,
  session::SessionHandle,
  store::CartStore,
  trigger::{PageLoad, Trigger},
  utm,
};

/// What a dispatched trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// A guard clause stopped the adapter; nothing was written.
  Skipped,
  /// Session state was updated; no cart was published.
  Handled,
  /// The cart was (re)published.
  CartUpdated(CartId),
  /// Marketing parameters were replayed onto an order; the platform should
  /// record these entries as order metadata.
  OrderMeta(BTreeMap<String, String>),
}

pub struct Engine<S> {
  store:     Arc<S>,
  publisher: Publisher,
}

impl<S> Clone for Engine<S> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      publisher: self.publisher.clone(),
    }
  }
}

impl<S: CartStore> Engine<S> {
  pub fn new(store: Arc<S>, publisher: Publisher) -> Self { Self { store, publisher } }

  /// A handle for the request carrying `cookie` as its session cookie.
  pub fn session(&self, cookie: Option<&str>) -> SessionHandle<S> {
    SessionHandle::new(self.store.clone(), cookie)
  }

  /// Route a trigger to its adapter.
  #[tracing::instrument(skip_all, fields(kind = trigger.kind()))]
  pub async fn dispatch(
    &self,
    session: &SessionHandle<S>,
    requester: &Requester,
    trigger: Trigger,
  ) -> Result<Outcome> {
    match trigger {
      Trigger::PageLoad(page) => self.page_load(session, &page).await,
      Trigger::Login { user } => self.capture_login(session, &user).await,
      Trigger::CheckoutEmail { email, live_cart } => {
        self
          .capture_checkout_email(session, requester, &email, live_cart.as_ref())
          .await
      }
      Trigger::ItemAdded {
        key,
        product_id,
        quantity,
        live_cart,
      } => {
        let cart = match &live_cart {
          Some(live) => CartAggregate::from_live_cart(session, requester, live),
          None => CartAggregate::from_added_item(session, requester, key, product_id, quantity),
        };
        self.record_cart_change(cart).await
      }
      Trigger::ItemRemoved { live_cart, .. }
      | Trigger::ItemRestored { live_cart, .. }
      | Trigger::QuantityChanged { live_cart, .. } => match &live_cart {
        Some(live) => {
          self
            .record_cart_change(CartAggregate::from_live_cart(session, requester, live))
            .await
        }
        None => Ok(Outcome::Skipped),
      },
      Trigger::CartEmptied => self.clear_cart(session).await,
      Trigger::NewOrder { order, live_cart } => {
        self
          .complete_order(session, requester, order, live_cart.as_ref())
          .await
      }
      Trigger::OrderReceived { order_id } => self.replay_utm(session, order_id).await,
    }
  }

  // ─── Attribution sources ──────────────────────────────────────────────────

  /// A signed-in user is attributed with `logged_in_user`.
  pub async fn capture_login(&self, session: &SessionHandle<S>, user: &User) -> Result<Outcome> {
    let Ok(email) = Email::parse(&user.email) else {
      tracing::debug!(user_id = user.id, "login without a usable email");
      return Ok(Outcome::Skipped);
    };
    session.set_email(email, EmailSource::LoggedInUser).await?;
    Ok(Outcome::Handled)
  }

  /// The email typed into the checkout form, forwarded by the platform. The
  /// live cart, if any, is republished so listeners see the new owner; it is
  /// not persisted.
  pub async fn capture_checkout_email(
    &self,
    session: &SessionHandle<S>,
    requester: &Requester,
    email: &str,
    live_cart: Option<&LiveCart>,
  ) -> Result<Outcome> {
    if !attribute_checkout(session, email).await? {
      return Ok(Outcome::Skipped);
    }

    match live_cart {
      Some(live) => {
        let mut cart = CartAggregate::from_live_cart(session, requester, live);
        let id = cart.push_update(&self.publisher).await?;
        Ok(Outcome::CartUpdated(id))
      }
      None => Ok(Outcome::Handled),
    }
  }

  /// The email typed into the checkout form, reported by the browser. Only
  /// the session's stored cart is republished; no cart is created.
  pub async fn capture_browser_email(
    &self,
    session: &SessionHandle<S>,
    email: &str,
  ) -> Result<Outcome> {
    if !attribute_checkout(session, email).await? {
      return Ok(Outcome::Skipped);
    }

    let Some(cart_id) = session.current_cart_id().await? else {
      return Ok(Outcome::Handled);
    };
    let Some(record) = self.store.get_cart(cart_id).await.map_err(Error::store)? else {
      tracing::warn!(%cart_id, "session points at a missing cart");
      return Ok(Outcome::Handled);
    };
    let rows = self
      .store
      .get_cart_items(cart_id)
      .await
      .map_err(Error::store)?;

    let requester = Requester {
      user_id:    record.user_id,
      ip_address: record.ip_address.clone(),
    };
    let mut cart = CartAggregate::from_stored(session, &requester, &record, rows);
    let id = cart.push_update(&self.publisher).await?;
    Ok(Outcome::CartUpdated(id))
  }

  /// Login, then the parameter scan, then marketing capture. A 404 page
  /// only runs the login capture.
  pub async fn page_load(&self, session: &SessionHandle<S>, page: &PageLoad) -> Result<Outcome> {
    let mut outcome = Outcome::Skipped;
    if let Some(user) = &page.user {
      outcome = merge(outcome, self.capture_login(session, user).await?);
    }
    if page.not_found {
      return Ok(outcome);
    }
    outcome = merge(outcome, self.scan_parameters(session, page).await?);
    outcome = merge(outcome, self.capture_utm(session, &page.query).await?);
    Ok(outcome)
  }

  /// Attribute the first parameter whose key contains `email` and whose
  /// value is a valid address, with `form_submit`. Sessions that already
  /// carry an email are left alone.
  pub async fn scan_parameters(
    &self,
    session: &SessionHandle<S>,
    page: &PageLoad,
  ) -> Result<Outcome> {
    if page.not_found || session.email().await?.is_some() {
      return Ok(Outcome::Skipped);
    }

    let found = page
      .parameters()
      .into_iter()
      .filter(|(key, _)| key.contains("email"))
      .find_map(|(_, value)| Email::parse(value).ok());

    match found {
      Some(email) => {
        session.set_email(email, EmailSource::FormSubmit).await?;
        Ok(Outcome::Handled)
      }
      None => Ok(Outcome::Skipped),
    }
  }

  /// Record tracked marketing parameters for the session. An `address`
  /// that decodes to a valid email is stored decoded and attributed with
  /// `blueodin_email`.
  ///
  /// Storage failures on the parameters themselves are logged and dropped.
  pub async fn capture_utm(
    &self,
    session: &SessionHandle<S>,
    query: &[(String, String)],
  ) -> Result<Outcome> {
    let mut parameters = utm::extract(query);
    if parameters.is_empty() {
      return Ok(Outcome::Skipped);
    }

    for (name, value) in &mut parameters {
      if *name != utm::ADDRESS_PARAM {
        continue;
      }
      if let Some(email) = utm::decode_address(value) {
        *value = email.as_str().to_owned();
        session.set_email(email, EmailSource::BlueodinEmail).await?;
      }
    }

    let session_id = session.session_id().await?;
    for (name, value) in parameters {
      if let Err(e) = self
        .store
        .upsert_utm(session_id, name.to_owned(), value)
        .await
      {
        tracing::warn!(%session_id, name, error = %e, "failed to record marketing parameter");
      }
    }
    Ok(Outcome::Handled)
  }

  /// Copy the session's marketing parameters onto `order_id`, at most once
  /// per order.
  pub async fn replay_utm(&self, session: &SessionHandle<S>, order_id: i64) -> Result<Outcome> {
    if order_id == 0 {
      return Ok(Outcome::Skipped);
    }

    let session_id = session.session_id().await?;
    let entries: Vec<(String, String)> = self
      .store
      .list_utm(session_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|datum| (utm::order_meta_key(&datum.name), datum.value))
      .collect();

    let written = self
      .store
      .replay_order_meta(order_id, utm::REPLAY_FLAG, entries.clone())
      .await
      .map_err(Error::store)?;
    if !written {
      tracing::debug!(order_id, "order metadata already replayed");
      return Ok(Outcome::Skipped);
    }

    let mut meta: BTreeMap<String, String> = entries.into_iter().collect();
    meta.insert(utm::REPLAY_FLAG.to_owned(), "1".to_owned());
    Ok(Outcome::OrderMeta(meta))
  }

  // ─── Cart lifecycle ───────────────────────────────────────────────────────

  /// Persist and publish a freshly built aggregate.
  pub async fn record_cart_change(&self, mut cart: CartAggregate<'_, S>) -> Result<Outcome> {
    cart.persist().await?;
    let id = cart.push_update(&self.publisher).await?;
    Ok(Outcome::CartUpdated(id))
  }

  /// Detach the session from its cart. The cart rows are kept; the next
  /// add starts a new cart.
  pub async fn clear_cart(&self, session: &SessionHandle<S>) -> Result<Outcome> {
    session.set_current_cart_id(None).await?;
    Ok(Outcome::Handled)
  }

  /// Turn the live cart into an order: attribute the billing email, persist
  /// with the order attached, publish. An order without a live cart is
  /// ignored.
  pub async fn complete_order(
    &self,
    session: &SessionHandle<S>,
    requester: &Requester,
    order: Order,
    live_cart: Option<&LiveCart>,
  ) -> Result<Outcome> {
    let Some(live) = live_cart else {
      tracing::debug!(order_id = order.id, "order without a live cart");
      return Ok(Outcome::Skipped);
    };

    match Email::parse(&order.billing_email) {
      Ok(email) => {
        session.set_email(email, EmailSource::Order).await?;
      }
      Err(e) => {
        tracing::debug!(order_id = order.id, error = %e, "order billing email not usable");
      }
    }

    let mut cart = CartAggregate::from_live_cart(session, requester, live);
    cart.set_order(order);
    self.record_cart_change(cart).await
  }
}

/// Attribute a checkout email. `false` if the address is unusable.
async fn attribute_checkout<S: CartStore>(session: &SessionHandle<S>, email: &str) -> Result<bool> {
  match Email::parse(email.trim()) {
    Ok(email) => {
      session.set_email(email, EmailSource::Checkout).await?;
      Ok(true)
    }
    Err(e) => {
      tracing::debug!(error = %e, "ignoring invalid checkout email");
      Ok(false)
    }
  }
}

fn merge(current: Outcome, next: Outcome) -> Outcome {
  match (current, next) {
    (current, Outcome::Skipped) => current,
    (_, next) => next,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::{
    attribution::Attribution,
    cart::{CartStatus, LiveCartLine},
    memory::MemoryStore,
    publish::CartEvent,
  };
  use rust_decimal::Decimal;

  struct Harness {
    store:  Arc<MemoryStore>,
    engine: Engine<MemoryStore>,
    events: Arc<Mutex<Vec<CartEvent>>>,
  }

  fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let events: Arc<Mutex<Vec<CartEvent>>> = Arc::default();
    let sink = events.clone();
    let publisher = Publisher::new().with_listener(move |event: &CartEvent| {
      sink.lock().unwrap().push(event.clone());
    });
    Harness {
      engine: Engine::new(store.clone(), publisher),
      store,
      events,
    }
  }

  impl Harness {
    fn published(&self) -> Vec<CartEvent> { self.events.lock().unwrap().clone() }
  }

  fn req() -> Requester {
    Requester {
      user_id:    None,
      ip_address: "192.0.2.1".into(),
    }
  }

  fn live(lines: &[(&str, i64, i64)]) -> LiveCart {
    LiveCart {
      lines: lines
        .iter()
        .map(|&(key, product_id, quantity)| LiveCartLine {
          key: key.into(),
          product_id,
          quantity,
          line_subtotal: Decimal::ONE,
          line_subtotal_tax: Decimal::ZERO,
          line_total: Decimal::ONE,
          line_tax: Decimal::ZERO,
        })
        .collect(),
      total: Decimal::new(lines.len() as i64, 0),
    }
  }

  fn params(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  async fn attribution(session: &SessionHandle<MemoryStore>) -> Option<(String, String)> {
    session
      .email()
      .await
      .unwrap()
      .map(|Attribution { email, source }| (email.into_inner(), source.as_str().to_owned()))
  }

  #[tokio::test]
  async fn item_added_without_live_cart_uses_synthetic_item() {
    let h = harness();
    let session = h.engine.session(None);

    let outcome = h
      .engine
      .dispatch(&session, &req(), Trigger::ItemAdded {
        key:        "k1".into(),
        product_id: 42,
        quantity:   2,
        live_cart:  None,
      })
      .await
      .unwrap();

    let Outcome::CartUpdated(id) = outcome else {
      panic!("expected a cart update, got {outcome:?}");
    };
    let rows = h.store.get_cart_items(id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].product_id, rows[0].quantity), (42, 2));

    let events = h.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].snapshot.items[0].line_total, Decimal::ZERO);
  }

  #[tokio::test]
  async fn other_mutations_without_live_cart_are_ignored() {
    let h = harness();
    let session = h.engine.session(None);

    for trigger in [
      Trigger::ItemRemoved { key: "k".into(), live_cart: None },
      Trigger::ItemRestored { key: "k".into(), live_cart: None },
      Trigger::QuantityChanged { key: "k".into(), quantity: 3, live_cart: None },
    ] {
      assert_eq!(h.engine.dispatch(&session, &req(), trigger).await.unwrap(), Outcome::Skipped);
    }
    assert_eq!(h.store.cart_count(), 0);
    assert!(h.published().is_empty());
  }

  #[tokio::test]
  async fn mutations_reuse_the_current_cart() {
    let h = harness();
    let session = h.engine.session(None);

    let first = h
      .engine
      .dispatch(&session, &req(), Trigger::ItemAdded {
        key:        "a".into(),
        product_id: 1,
        quantity:   1,
        live_cart:  Some(live(&[("a", 1, 1)])),
      })
      .await
      .unwrap();
    let second = h
      .engine
      .dispatch(&session, &req(), Trigger::QuantityChanged {
        key:       "a".into(),
        quantity:  4,
        live_cart: Some(live(&[("a", 1, 4), ("b", 2, 1)])),
      })
      .await
      .unwrap();

    assert_eq!(first, second);
    let Outcome::CartUpdated(id) = second else {
      panic!("expected a cart update");
    };
    let rows = h.store.get_cart_items(id).await.unwrap();
    assert_eq!(rows.iter().map(|r| r.quantity).collect::<Vec<_>>(), vec![4, 1]);
    assert_eq!(h.store.cart_count(), 1);
    assert_eq!(h.published().len(), 2);
  }

  #[tokio::test]
  async fn emptied_cart_clears_pointer_and_next_add_starts_over() {
    let h = harness();
    let session = h.engine.session(None);
    let add = |key: &str| Trigger::ItemAdded {
      key:        key.into(),
      product_id: 1,
      quantity:   1,
      live_cart:  None,
    };

    let Outcome::CartUpdated(first) = h.engine.dispatch(&session, &req(), add("a")).await.unwrap()
    else {
      panic!("expected a cart update");
    };
    assert_eq!(
      h.engine
        .dispatch(&session, &req(), Trigger::CartEmptied)
        .await
        .unwrap(),
      Outcome::Handled
    );
    assert_eq!(session.current_cart_id().await.unwrap(), None);
    // The emptied cart itself is untouched.
    assert_eq!(h.store.get_cart_items(first).await.unwrap().len(), 1);

    let Outcome::CartUpdated(second) =
      h.engine.dispatch(&session, &req(), add("b")).await.unwrap()
    else {
      panic!("expected a cart update");
    };
    assert_ne!(first, second);
    assert_eq!(session.current_cart_id().await.unwrap(), Some(second));
  }

  #[tokio::test]
  async fn checkout_email_republishes_without_persisting() {
    let h = harness();
    let session = h.engine.session(None);

    let outcome = h
      .engine
      .capture_checkout_email(&session, &req(), " buyer@example.com ", Some(&live(&[("a", 1, 1)])))
      .await
      .unwrap();

    let Outcome::CartUpdated(id) = outcome else {
      panic!("expected a cart update");
    };
    assert!(h.store.get_cart_items(id).await.unwrap().is_empty());
    let events = h.published();
    assert_eq!(events[0].snapshot.customer_details.email, "buyer@example.com");
    assert_eq!(events[0].snapshot.customer_details.source, "checkout");
  }

  #[tokio::test]
  async fn invalid_checkout_email_is_skipped() {
    let h = harness();
    let session = h.engine.session(None);

    let outcome = h
      .engine
      .dispatch(&session, &req(), Trigger::CheckoutEmail {
        email:     "nope".into(),
        live_cart: Some(live(&[("a", 1, 1)])),
      })
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    assert_eq!(attribution(&session).await, None);
    assert!(h.published().is_empty());
  }

  #[tokio::test]
  async fn checkout_without_live_cart_only_attributes() {
    let h = harness();
    let session = h.engine.session(None);

    let outcome = h
      .engine
      .capture_checkout_email(&session, &req(), "buyer@example.com", None)
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(
      attribution(&session).await,
      Some(("buyer@example.com".into(), "checkout".into()))
    );
  }

  #[tokio::test]
  async fn browser_capture_republishes_stored_cart_only() {
    let h = harness();
    let session = h.engine.session(None);

    let outcome = h
      .engine
      .capture_browser_email(&session, "buyer@example.com")
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(h.store.cart_count(), 0);
    assert!(h.published().is_empty());

    let Outcome::CartUpdated(id) = h
      .engine
      .dispatch(&session, &req(), Trigger::ItemAdded {
        key:        "a".into(),
        product_id: 7,
        quantity:   3,
        live_cart:  Some(live(&[("a", 7, 3)])),
      })
      .await
      .unwrap()
    else {
      panic!("expected a cart update");
    };

    let outcome = h
      .engine
      .capture_browser_email(&session, "buyer@example.com")
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::CartUpdated(id));
    assert_eq!(h.store.cart_count(), 1);

    let events = h.published();
    let snapshot = &events.last().unwrap().snapshot;
    assert_eq!(snapshot.items, vec![crate::cart::CartItem::new("a", 7, 3)]);
    assert_eq!(snapshot.order_total, Decimal::ZERO);
    assert_eq!(snapshot.customer_details.source, "checkout");
    assert_eq!(h.store.get_cart(id).await.unwrap().unwrap().ip_address, "192.0.2.1");
  }

  #[tokio::test]
  async fn browser_capture_ignores_invalid_email() {
    let h = harness();
    let session = h.engine.session(None);
    assert_eq!(
      h.engine.capture_browser_email(&session, "nope").await.unwrap(),
      Outcome::Skipped
    );
    assert_eq!(attribution(&session).await, None);
  }

  #[tokio::test]
  async fn new_order_attributes_billing_email_and_marks_ordered() {
    let h = harness();
    let session = h.engine.session(None);
    session
      .set_email(Email::parse("old@example.com").unwrap(), EmailSource::LoggedInUser)
      .await
      .unwrap();

    let order = Order {
      id:            501,
      billing_email: "billing@example.com".into(),
      user:          None,
    };
    let outcome = h
      .engine
      .dispatch(&session, &req(), Trigger::NewOrder {
        order,
        live_cart: Some(live(&[("a", 1, 1)])),
      })
      .await
      .unwrap();

    let Outcome::CartUpdated(id) = outcome else {
      panic!("expected a cart update");
    };
    assert_eq!(h.store.get_cart(id).await.unwrap().unwrap().order_id, Some(501));
    assert_eq!(
      attribution(&session).await,
      Some(("billing@example.com".into(), "order".into()))
    );

    let snapshot = &h.published()[0].snapshot;
    assert_eq!(snapshot.cart_status, CartStatus::Ordered);
    assert_eq!(snapshot.customer_details.email, "billing@example.com");
    assert_eq!(snapshot.customer_details.customer_id, None);
  }

  #[tokio::test]
  async fn new_order_without_live_cart_is_ignored() {
    let h = harness();
    let session = h.engine.session(None);
    let order = Order {
      id:            1,
      billing_email: "billing@example.com".into(),
      user:          None,
    };

    let outcome = h
      .engine
      .dispatch(&session, &req(), Trigger::NewOrder { order, live_cart: None })
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::Skipped);
    assert_eq!(attribution(&session).await, None);
  }

  #[tokio::test]
  async fn parameter_scan_takes_first_match() {
    let h = harness();
    let session = h.engine.session(None);
    let page = PageLoad {
      query: params(&[
        ("email", "not-an-email"),
        ("billing_email", "first@example.com"),
        ("email2", "second@example.com"),
      ]),
      ..PageLoad::default()
    };

    assert_eq!(h.engine.page_load(&session, &page).await.unwrap(), Outcome::Handled);
    assert_eq!(
      attribution(&session).await,
      Some(("first@example.com".into(), "form_submit".into()))
    );
  }

  #[tokio::test]
  async fn parameter_scan_skips_attributed_sessions() {
    let h = harness();
    let session = h.engine.session(None);
    session
      .set_email(Email::parse("known@example.com").unwrap(), EmailSource::BlueodinEmail)
      .await
      .unwrap();

    let page = PageLoad {
      body: params(&[("your_email", "other@example.com")]),
      ..PageLoad::default()
    };
    assert_eq!(h.engine.scan_parameters(&session, &page).await.unwrap(), Outcome::Skipped);
    assert_eq!(
      attribution(&session).await,
      Some(("known@example.com".into(), "blueodin_email".into()))
    );
  }

  #[tokio::test]
  async fn page_load_with_user_logs_in_first() {
    let h = harness();
    let session = h.engine.session(None);
    let page = PageLoad {
      user: Some(User { id: 3, email: "member@example.com".into() }),
      query: params(&[("email", "visitor@example.com")]),
      ..PageLoad::default()
    };

    h.engine.page_load(&session, &page).await.unwrap();
    assert_eq!(
      attribution(&session).await,
      Some(("member@example.com".into(), "logged_in_user".into()))
    );
  }

  #[tokio::test]
  async fn not_found_page_skips_scan_and_utm() {
    let h = harness();
    let session = h.engine.session(None);
    let page = PageLoad {
      query: params(&[("utm_source", "ads"), ("email", "a@example.com")]),
      not_found: true,
      ..PageLoad::default()
    };

    assert_eq!(h.engine.page_load(&session, &page).await.unwrap(), Outcome::Skipped);
    let session_id = session.session_id().await.unwrap();
    assert!(h.store.list_utm(session_id).await.unwrap().is_empty());
    assert_eq!(attribution(&session).await, None);
  }

  #[tokio::test]
  async fn utm_capture_decodes_address() {
    let h = harness();
    let session = h.engine.session(None);
    let query = params(&[
      ("utm_source", "mail"),
      ("address", "c2hvcHBlckBleGFtcGxlLmNvbQ=="),
      ("utm_medium", ""),
    ]);

    assert_eq!(h.engine.capture_utm(&session, &query).await.unwrap(), Outcome::Handled);

    let session_id = session.session_id().await.unwrap();
    let stored: Vec<(String, String)> = h
      .store
      .list_utm(session_id)
      .await
      .unwrap()
      .into_iter()
      .map(|d| (d.name, d.value))
      .collect();
    assert_eq!(stored, vec![
      ("address".into(), "shopper@example.com".into()),
      ("utm_source".into(), "mail".into()),
    ]);
    assert_eq!(
      attribution(&session).await,
      Some(("shopper@example.com".into(), "blueodin_email".into()))
    );
  }

  #[tokio::test]
  async fn undecodable_address_is_stored_raw() {
    let h = harness();
    let session = h.engine.session(None);

    h.engine
      .capture_utm(&session, &params(&[("address", "garbage")]))
      .await
      .unwrap();

    let session_id = session.session_id().await.unwrap();
    let stored = h.store.list_utm(session_id).await.unwrap();
    assert_eq!(stored[0].value, "garbage");
    assert_eq!(attribution(&session).await, None);
  }

  #[tokio::test]
  async fn order_replay_happens_once() {
    let h = harness();
    let session = h.engine.session(None);
    h.engine
      .capture_utm(&session, &params(&[("utm_campaign", "fall"), ("utm_id", "7")]))
      .await
      .unwrap();

    assert_eq!(h.engine.replay_utm(&session, 0).await.unwrap(), Outcome::Skipped);

    let Outcome::OrderMeta(meta) = h
      .engine
      .dispatch(&session, &req(), Trigger::OrderReceived { order_id: 88 })
      .await
      .unwrap()
    else {
      panic!("expected replayed metadata");
    };
    assert_eq!(meta.get("_bo_utm_campaign").map(String::as_str), Some("fall"));
    assert_eq!(meta.get("_bo_utm_id").map(String::as_str), Some("7"));
    assert!(meta.contains_key(utm::REPLAY_FLAG));

    assert_eq!(h.engine.replay_utm(&session, 88).await.unwrap(), Outcome::Skipped);
    assert_eq!(h.store.order_meta(88).await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn login_trigger_overrides_form_submit() {
    let h = harness();
    let session = h.engine.session(None);
    session
      .set_email(Email::parse("p@q.com").unwrap(), EmailSource::FormSubmit)
      .await
      .unwrap();

    let outcome = h
      .engine
      .dispatch(&session, &req(), Trigger::Login {
        user: User { id: 9, email: "r@s.com".into() },
      })
      .await
      .unwrap();
    assert_eq!(outcome, Outcome::Handled);
    assert_eq!(attribution(&session).await, Some(("r@s.com".into(), "logged_in_user".into())));
  }
}
