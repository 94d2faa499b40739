//! [`SqliteStore`], the SQLite implementation of [`CartStore`].

use std::path::Path;

use cartrack_core::{
  attribution::Attribution,
  cart::CartId,
  store::{CartHeader, CartRecord, CartStore, ItemRow, NewCart, Session, UtmDatum},
};
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawCart, RawSession, RawUtm, encode_attribution, encode_dt, encode_uuid},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A cart store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── CartStore impl ──────────────────────────────────────────────────────────

impl CartStore for SqliteStore {
  type Error = Error;

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
    let id_str = encode_uuid(session_id);

    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM sessions WHERE session_id = ?1", RawSession::COLUMNS),
              rusqlite::params![id_str],
              RawSession::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }

  async fn insert_session(&self, session_id: Uuid) -> Result<Session> {
    let id_str = encode_uuid(session_id);
    let now_str = encode_dt(Utc::now());

    let raw: RawSession = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sessions (session_id, created_at, last_seen)
           VALUES (?1, ?2, ?2)
           ON CONFLICT (session_id) DO NOTHING",
          rusqlite::params![id_str, now_str],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {} FROM sessions WHERE session_id = ?1", RawSession::COLUMNS),
          rusqlite::params![id_str],
          RawSession::from_row,
        )?)
      })
      .await?;

    raw.into_session()
  }

  async fn touch_session(&self, session_id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(session_id);
    let now_str = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE sessions SET last_seen = ?2 WHERE session_id = ?1",
          rusqlite::params![id_str, now_str],
        )?)
      })
      .await?;

    Ok(changed > 0)
  }

  async fn set_current_cart(&self, session_id: Uuid, cart_id: Option<CartId>) -> Result<()> {
    let id_str = encode_uuid(session_id);
    let now_str = encode_dt(Utc::now());
    let cart = cart_id.map(|c| c.0);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE sessions SET current_cart_id = ?2, last_seen = ?3 WHERE session_id = ?1",
          rusqlite::params![id_str, cart, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_attribution(&self, session_id: Uuid, attribution: Attribution) -> Result<()> {
    let id_str = encode_uuid(session_id);
    let now_str = encode_dt(Utc::now());
    let (email, source) = encode_attribution(&attribution);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE sessions SET email = ?2, email_source = ?3, last_seen = ?4
           WHERE session_id = ?1",
          rusqlite::params![id_str, email, source, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Carts ─────────────────────────────────────────────────────────────────

  async fn insert_cart(&self, cart: NewCart) -> Result<CartId> {
    let session_str = encode_uuid(cart.session_id);
    let now_str = encode_dt(Utc::now());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO carts (time, session_id, user_id, ip_address) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![now_str, session_str, cart.user_id, cart.ip_address],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(CartId(id))
  }

  async fn update_cart(&self, cart_id: CartId, header: CartHeader) -> Result<()> {
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE carts SET time = ?2, user_id = ?3, ip_address = ?4, order_id = ?5
           WHERE id = ?1",
          rusqlite::params![
            cart_id.0,
            now_str,
            header.user_id,
            header.ip_address,
            header.order_id,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartRecord>> {
    let raw: Option<RawCart> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM carts WHERE id = ?1", RawCart::COLUMNS),
              rusqlite::params![cart_id.0],
              RawCart::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCart::into_record).transpose()
  }

  async fn replace_cart_items(&self, cart_id: CartId, items: Vec<ItemRow>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cart_items WHERE cart_id = ?1", rusqlite::params![cart_id.0])?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO cart_items (cart_id, item_key, product_id, quantity)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (cart_id, item_key)
             DO UPDATE SET product_id = excluded.product_id, quantity = excluded.quantity",
          )?;
          for item in &items {
            stmt.execute(rusqlite::params![
              cart_id.0,
              item.item_key,
              item.product_id,
              item.quantity,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_cart_items(&self, cart_id: CartId) -> Result<Vec<ItemRow>> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_key, product_id, quantity FROM cart_items
           WHERE cart_id = ?1 ORDER BY item_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![cart_id.0], |row| {
            Ok(ItemRow {
              item_key:   row.get(0)?,
              product_id: row.get(1)?,
              quantity:   row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  // ── Marketing parameters ──────────────────────────────────────────────────

  async fn upsert_utm(&self, session_id: Uuid, name: String, value: String) -> Result<()> {
    let id_str = encode_uuid(session_id);
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO utm_data (time, session_id, name, value) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (name, session_id) DO UPDATE SET value = excluded.value",
          rusqlite::params![now_str, id_str, name, value],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_utm(&self, session_id: Uuid) -> Result<Vec<UtmDatum>> {
    let id_str = encode_uuid(session_id);

    let raws: Vec<RawUtm> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT time, session_id, name, value FROM utm_data
           WHERE session_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok(RawUtm {
              time:       row.get(0)?,
              session_id: row.get(1)?,
              name:       row.get(2)?,
              value:      row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUtm::into_datum).collect()
  }

  // ── Orders ────────────────────────────────────────────────────────────────

  async fn replay_order_meta(
    &self,
    order_id: i64,
    flag: &'static str,
    entries: Vec<(String, String)>,
  ) -> Result<bool> {
    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let done = tx
          .query_row(
            "SELECT 1 FROM order_meta WHERE order_id = ?1 AND name = ?2",
            rusqlite::params![order_id, flag],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if done {
          return Ok(false);
        }

        {
          let mut stmt = tx.prepare(
            "INSERT INTO order_meta (order_id, name, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (order_id, name) DO UPDATE SET value = excluded.value",
          )?;
          for (name, value) in &entries {
            stmt.execute(rusqlite::params![order_id, name, value])?;
          }
          stmt.execute(rusqlite::params![order_id, flag, "1"])?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if written {
      tracing::debug!(order_id, "order metadata replayed");
    }
    Ok(written)
  }

  async fn order_meta(&self, order_id: i64) -> Result<Vec<(String, String)>> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT name, value FROM order_meta WHERE order_id = ?1 ORDER BY name")?;
        let rows: Vec<(String, String)> = stmt
          .query_map(rusqlite::params![order_id], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  // ── Maintenance ───────────────────────────────────────────────────────────

  async fn purge(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(
          "DELETE FROM cart_items;
           DELETE FROM carts;
           DELETE FROM utm_data;
           DELETE FROM order_meta;
           DELETE FROM sessions;",
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    tracing::info!("purged all tracking data");
    Ok(())
  }
}
