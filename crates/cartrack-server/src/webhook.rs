//! Outbound webhook delivery of cart events.
//!
//! Each configured target receives one POST per event. Deliveries run on
//! spawned tasks so the publishing request never waits on the network.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use cartrack_core::publish::{CartEvent, CartListener};
use serde::Deserialize;
use serde_json::{Map, Value, json};

pub const WEBHOOK_RESOURCE: &str = "bo_cart";
pub const WEBHOOK_TOPIC: &str = "bo_cart.updated";
pub const TOPIC_HEADER: &str = "X-WC-Webhook-Topic";

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WebhookTarget {
  pub id:  i64,
  pub url: String,
}

/// The delivered body: webhook envelope fields merged with the snapshot.
pub fn payload(webhook_id: i64, event: &CartEvent) -> serde_json::Result<Value> {
  let mut body = Map::new();
  body.insert("webhook_id".into(), json!(webhook_id));
  body.insert("webhook_action".into(), json!(event.action.as_str()));
  body.insert("webhook_resource".into(), json!(WEBHOOK_RESOURCE));
  body.insert("webhook_resource_id".into(), json!(event.cart_id));
  if let Value::Object(snapshot) = serde_json::to_value(&event.snapshot)? {
    body.extend(snapshot);
  }
  Ok(Value::Object(body))
}

pub struct WebhookListener {
  client:  reqwest::Client,
  targets: Arc<[WebhookTarget]>,
}

impl WebhookListener {
  pub fn new(targets: Vec<WebhookTarget>) -> anyhow::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, targets: targets.into() })
  }
}

impl CartListener for WebhookListener {
  fn on_cart_event(&self, event: &CartEvent) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      tracing::warn!(cart_id = %event.cart_id, "no runtime; webhook delivery skipped");
      return;
    };

    for target in self.targets.iter() {
      let body = match payload(target.id, event) {
        Ok(body) => body,
        Err(e) => {
          tracing::warn!(webhook_id = target.id, error = %e, "failed to encode webhook payload");
          continue;
        }
      };
      let client = self.client.clone();
      let target = target.clone();
      let cart_id = event.cart_id;
      runtime.spawn(async move {
        let result = client
          .post(&target.url)
          .header(TOPIC_HEADER, WEBHOOK_TOPIC)
          .json(&body)
          .send()
          .await
          .and_then(reqwest::Response::error_for_status);
        match result {
          Ok(resp) => {
            tracing::debug!(webhook_id = target.id, %cart_id, status = %resp.status(), "webhook delivered")
          }
          Err(e) => {
            tracing::warn!(webhook_id = target.id, %cart_id, url = %target.url, error = %e, "webhook delivery failed")
          }
        }
      });
    }
  }
}
