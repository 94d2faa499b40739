//! Typed platform events.
//!
//! Every inbound hook is one [`Trigger`] variant carrying exactly the data
//! its adapter needs. The JSON form is internally tagged by `kind`.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::cart::{LiveCart, Order, Requester, User};

/// A rendered storefront page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageLoad {
  /// The authenticated account, if any.
  #[serde(default)]
  pub user:      Option<User>,
  /// Query string parameters, in request order.
  #[serde(default)]
  pub query:     Vec<(String, String)>,
  /// Form body parameters, in request order.
  #[serde(default)]
  pub body:      Vec<(String, String)>,
  /// The page resolved to a 404.
  #[serde(default)]
  pub not_found: bool,
}

impl PageLoad {
  /// Query and body merged the way a form handler sees them: body values
  /// replace query values of the same key in place, new body keys are
  /// appended.
  pub fn parameters(&self) -> Vec<(&str, &str)> {
    let mut merged: Vec<(&str, &str)> = Vec::new();
    for (key, value) in self.query.iter().chain(&self.body) {
      match merged.iter_mut().find(|(k, _)| *k == key.as_str()) {
        Some(slot) => slot.1 = value.as_str(),
        None => merged.push((key.as_str(), value.as_str())),
      }
    }
    merged
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
  PageLoad(PageLoad),
  Login {
    user: User,
  },
  CheckoutEmail {
    email:     String,
    #[serde(default)]
    live_cart: Option<LiveCart>,
  },
  ItemAdded {
    key:        String,
    product_id: i64,
    quantity:   i64,
    #[serde(default)]
    live_cart:  Option<LiveCart>,
  },
  ItemRemoved {
    key:       String,
    #[serde(default)]
    live_cart: Option<LiveCart>,
  },
  ItemRestored {
    key:       String,
    #[serde(default)]
    live_cart: Option<LiveCart>,
  },
  QuantityChanged {
    key:       String,
    quantity:  i64,
    #[serde(default)]
    live_cart: Option<LiveCart>,
  },
  CartEmptied,
  NewOrder {
    order:     Order,
    #[serde(default)]
    live_cart: Option<LiveCart>,
  },
  OrderReceived {
    order_id: i64,
  },
}

impl Trigger {
  pub fn kind(&self) -> &'static str { self.into() }
}

/// The body of a hook call: who asked, and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  #[serde(default)]
  pub requester: Requester,
  pub trigger:   Trigger,
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn deserializes_tagged_variants() {
    let envelope: Envelope = serde_json::from_value(json!({
      "requester": { "user_id": 4, "ip_address": "198.51.100.2" },
      "trigger": {
        "kind": "item_added",
        "key": "abc",
        "product_id": 12,
        "quantity": 2
      }
    }))
    .unwrap();

    assert_eq!(envelope.requester.user_id, Some(4));
    assert_eq!(envelope.trigger, Trigger::ItemAdded {
      key:        "abc".into(),
      product_id: 12,
      quantity:   2,
      live_cart:  None,
    });
    assert_eq!(envelope.trigger.kind(), "item_added");
  }

  #[test]
  fn unit_and_newtype_variants() {
    let emptied: Trigger = serde_json::from_value(json!({ "kind": "cart_emptied" })).unwrap();
    assert_eq!(emptied, Trigger::CartEmptied);

    let page: Trigger = serde_json::from_value(json!({
      "kind": "page_load",
      "query": [["utm_source", "news"]],
      "not_found": true
    }))
    .unwrap();
    let Trigger::PageLoad(page) = page else {
      panic!("expected page_load");
    };
    assert!(page.not_found);
    assert!(page.user.is_none());
    assert_eq!(page.query, vec![("utm_source".to_owned(), "news".to_owned())]);
  }

  #[test]
  fn requester_defaults_when_absent() {
    let envelope: Envelope =
      serde_json::from_value(json!({ "trigger": { "kind": "order_received", "order_id": 9 } }))
        .unwrap();
    assert_eq!(envelope.requester, Requester::default());
    assert_eq!(envelope.trigger.kind(), "order_received");
  }

  #[test]
  fn body_overrides_query_in_place() {
    let page = PageLoad {
      query: vec![
        ("a".into(), "1".into()),
        ("email".into(), "q@x.com".into()),
      ],
      body: vec![("c".into(), "3".into()), ("a".into(), "2".into())],
      ..PageLoad::default()
    };
    assert_eq!(page.parameters(), vec![("a", "2"), ("email", "q@x.com"), ("c", "3")]);
  }
}
