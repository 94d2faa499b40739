//! Request-scoped access to a visitor's session.
//!
//! A [`SessionHandle`] is created once per request from the value of the
//! session cookie. The token is resolved lazily on first use and memoized,
//! so any number of calls within one request cost at most one insert. The
//! attribution is likewise loaded at most once per handle.

use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::{
  Error, Result,
  attribution::{Attribution, EmailSource, should_update},
  cart::CartId,
  email::Email,
  store::CartStore,
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE_NAME: &str = "wordpress_bo_session";

/// Lifetime of the session cookie, in seconds (one year).
pub const SESSION_COOKIE_MAX_AGE: i64 = 31_556_926;

#[derive(Debug, Clone, Copy)]
struct Resolved {
  session_id: Uuid,
  /// A new token was generated; the caller must hand it back as a cookie.
  issued:     bool,
}

pub struct SessionHandle<S> {
  store:  Arc<S>,
  cookie: Option<String>,
  id:     OnceCell<Resolved>,
  /// `None` until loaded; then the session's attribution, if any.
  email:  Mutex<Option<Option<Attribution>>>,
}

impl<S: CartStore> SessionHandle<S> {
  /// Wrap the raw cookie value of the current request. No storage work
  /// happens until the token is first needed.
  pub fn new(store: Arc<S>, cookie: Option<&str>) -> Self {
    Self {
      store,
      cookie: cookie.map(str::to_owned),
      id: OnceCell::new(),
      email: Mutex::new(None),
    }
  }

  pub fn store(&self) -> &S { &self.store }

  /// The session token, resolving it on first call.
  ///
  /// A well-formed token is resumed (its row is created if the store has
  /// never seen it); a missing or malformed one is replaced by a freshly
  /// generated token and a new row.
  pub async fn session_id(&self) -> Result<Uuid> {
    let resolved = self.id.get_or_try_init(|| self.resolve()).await?;
    Ok(resolved.session_id)
  }

  /// The token that must be set as a cookie on the response, if this
  /// handle generated one.
  pub fn issued_token(&self) -> Option<Uuid> {
    self
      .id
      .get()
      .filter(|resolved| resolved.issued)
      .map(|resolved| resolved.session_id)
  }

  async fn resolve(&self) -> Result<Resolved> {
    let cookie_id = self
      .cookie
      .as_deref()
      .and_then(|raw| Uuid::parse_str(raw.trim()).ok());

    if let Some(session_id) = cookie_id {
      let known = self
        .store
        .touch_session(session_id)
        .await
        .map_err(Error::store)?;
      if !known {
        self
          .store
          .insert_session(session_id)
          .await
          .map_err(Error::store)?;
      }
      return Ok(Resolved { session_id, issued: false });
    }

    let session_id = Uuid::new_v4();
    self
      .store
      .insert_session(session_id)
      .await
      .map_err(Error::store)?;
    tracing::debug!(%session_id, "issued new session");
    Ok(Resolved { session_id, issued: true })
  }

  // ── Current cart ──────────────────────────────────────────────────────

  /// The session's in-progress cart, read from the store on every call.
  pub async fn current_cart_id(&self) -> Result<Option<CartId>> {
    let session_id = self.session_id().await?;
    let session = self
      .store
      .get_session(session_id)
      .await
      .map_err(Error::store)?;
    Ok(session.and_then(|s| s.current_cart_id))
  }

  /// Point the session at a cart; `None` detaches an emptied cart.
  pub async fn set_current_cart_id(&self, cart_id: Option<CartId>) -> Result<()> {
    let session_id = self.session_id().await?;
    self
      .store
      .set_current_cart(session_id, cart_id)
      .await
      .map_err(Error::store)
  }

  // ── Attribution ───────────────────────────────────────────────────────

  /// The session's attribution, loaded once per handle.
  pub async fn email(&self) -> Result<Option<Attribution>> {
    let mut cache = self.email.lock().await;
    if let Some(cached) = cache.as_ref() {
      return Ok(cached.clone());
    }

    let loaded = self.load_attribution().await?;
    *cache = Some(loaded.clone());
    Ok(loaded)
  }

  /// Attribute the session to `email` if the overwrite rule allows it.
  ///
  /// Returns whether the attribution was written. A rejected claim touches
  /// nothing, not even `last_seen`.
  pub async fn set_email(&self, email: Email, source: EmailSource) -> Result<bool> {
    let session_id = self.session_id().await?;
    let mut cache = self.email.lock().await;

    let current = match cache.as_ref() {
      Some(cached) => cached.clone(),
      None => self.load_attribution().await?,
    };

    let proposed = Attribution::new(email, source);
    if !should_update(current.as_ref(), &proposed) {
      tracing::debug!(
        %session_id,
        current = ?current.as_ref().map(|a| a.source.as_str()),
        proposed = %proposed.source,
        "attribution rejected"
      );
      *cache = Some(current);
      return Ok(false);
    }

    self
      .store
      .set_attribution(session_id, proposed.clone())
      .await
      .map_err(Error::store)?;
    tracing::debug!(%session_id, source = %proposed.source, "attribution updated");
    *cache = Some(Some(proposed));
    Ok(true)
  }

  async fn load_attribution(&self) -> Result<Option<Attribution>> {
    let session_id = self.session_id().await?;
    let session = self
      .store
      .get_session(session_id)
      .await
      .map_err(Error::store)?;
    Ok(session.and_then(|s| s.attribution))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::MemoryStore;

  fn email(s: &str) -> Email { Email::parse(s).unwrap() }

  fn handle(store: &MemoryStore, cookie: Option<&str>) -> SessionHandle<MemoryStore> {
    SessionHandle::new(Arc::new(store.clone()), cookie)
  }

  #[tokio::test]
  async fn missing_cookie_creates_exactly_one_session() {
    let store = MemoryStore::new();
    let session = handle(&store, None);

    let first = session.session_id().await.unwrap();
    for _ in 0..5 {
      assert_eq!(session.session_id().await.unwrap(), first);
    }
    session.email().await.unwrap();
    session.current_cart_id().await.unwrap();

    assert_eq!(store.session_inserts(), 1);
    assert_eq!(session.issued_token(), Some(first));
  }

  #[tokio::test]
  async fn known_cookie_resumes_without_issuing() {
    let store = MemoryStore::new();
    let first = handle(&store, None);
    let id = first.session_id().await.unwrap();

    let second = handle(&store, Some(&id.to_string()));
    assert_eq!(second.session_id().await.unwrap(), id);
    assert_eq!(second.issued_token(), None);
    assert_eq!(store.session_inserts(), 1);
  }

  #[tokio::test]
  async fn unknown_but_valid_cookie_is_created_lazily() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();
    let session = handle(&store, Some(&id.to_string()));

    assert_eq!(session.session_id().await.unwrap(), id);
    assert_eq!(session.issued_token(), None);
    assert!(store.get_session(id).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn malformed_cookie_is_treated_as_absent() {
    let store = MemoryStore::new();
    let session = handle(&store, Some("not-a-uuid"));

    let id = session.session_id().await.unwrap();
    assert_eq!(session.issued_token(), Some(id));
  }

  #[tokio::test]
  async fn attribution_is_read_once_per_handle() {
    let store = MemoryStore::new();
    let id = handle(&store, None).session_id().await.unwrap();

    let session = handle(&store, Some(&id.to_string()));
    session.session_id().await.unwrap();
    let before = store.session_reads();

    for _ in 0..3 {
      assert!(session.email().await.unwrap().is_none());
    }
    session
      .set_email(email("a@b.com"), EmailSource::FormSubmit)
      .await
      .unwrap();
    session
      .set_email(email("a@b.com"), EmailSource::FormSubmit)
      .await
      .unwrap();
    assert!(session.email().await.unwrap().is_some());

    assert_eq!(store.session_reads() - before, 1);
  }

  #[tokio::test]
  async fn set_email_first_also_reads_once() {
    let store = MemoryStore::new();
    let session = handle(&store, None);
    session.session_id().await.unwrap();
    let before = store.session_reads();

    session
      .set_email(email("a@b.com"), EmailSource::Checkout)
      .await
      .unwrap();
    session.email().await.unwrap();
    session
      .set_email(email("c@d.com"), EmailSource::FormSubmit)
      .await
      .unwrap();

    assert_eq!(store.session_reads() - before, 1);
  }

  #[tokio::test]
  async fn login_overrides_weak_sources() {
    let store = MemoryStore::new();
    let session = handle(&store, None);

    assert!(session.email().await.unwrap().is_none());
    assert!(
      session
        .set_email(email("p@q.com"), EmailSource::FormSubmit)
        .await
        .unwrap()
    );
    assert!(
      session
        .set_email(email("r@s.com"), EmailSource::LoggedInUser)
        .await
        .unwrap()
    );
    assert!(
      !session
        .set_email(email("t@u.com"), EmailSource::FormSubmit)
        .await
        .unwrap()
    );

    let expected = Attribution::new(email("r@s.com"), EmailSource::LoggedInUser);
    assert_eq!(session.email().await.unwrap(), Some(expected.clone()));

    // A fresh handle sees the persisted state, not just the memo.
    let id = session.session_id().await.unwrap();
    let reread = handle(&store, Some(&id.to_string()));
    assert_eq!(reread.email().await.unwrap(), Some(expected));
  }

  #[tokio::test]
  async fn order_attribution_is_sticky() {
    let store = MemoryStore::new();
    let session = handle(&store, None);

    session
      .set_email(email("a@b.com"), EmailSource::Order)
      .await
      .unwrap();
    assert!(
      !session
        .set_email(email("c@d.com"), EmailSource::LoggedInUser)
        .await
        .unwrap()
    );
    assert!(
      session
        .set_email(email("c@d.com"), EmailSource::Order)
        .await
        .unwrap()
    );
    assert_eq!(
      session.email().await.unwrap().map(|a| a.email),
      Some(email("c@d.com"))
    );
  }

  #[tokio::test]
  async fn rejected_claim_does_not_touch_last_seen() {
    let store = MemoryStore::new();
    let session = handle(&store, None);
    let id = session.session_id().await.unwrap();

    session
      .set_email(email("a@b.com"), EmailSource::Checkout)
      .await
      .unwrap();
    let before = store.get_session(id).await.unwrap().unwrap().last_seen;

    session
      .set_email(email("x@y.com"), EmailSource::FormSubmit)
      .await
      .unwrap();
    let after = store.get_session(id).await.unwrap().unwrap();
    assert_eq!(after.last_seen, before);
    assert_eq!(after.attribution.unwrap().email, email("a@b.com"));
  }

  #[tokio::test]
  async fn current_cart_pointer_round_trips() {
    let store = MemoryStore::new();
    let session = handle(&store, None);

    assert_eq!(session.current_cart_id().await.unwrap(), None);
    session.set_current_cart_id(Some(CartId(7))).await.unwrap();
    assert_eq!(session.current_cart_id().await.unwrap(), Some(CartId(7)));
    session.set_current_cart_id(None).await.unwrap();
    assert_eq!(session.current_cart_id().await.unwrap(), None);
  }
}
