use std::future::Future;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::auth::new_id;
use crate::models::SubscriptionRow;
use crate::state::PushConfig;

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionInput {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// One browser/device push subscription tied to an appointment, plus the
/// global token registry used for broadcast sends. Both writes are
/// idempotent upserts keyed by endpoint.
pub async fn store_subscription(
    pool: &SqlitePool,
    appointment_id: &str,
    subscription: &PushSubscriptionInput,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO notification_subscriptions (id, appointment_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(appointment_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(&subscription.endpoint)
    .bind(&subscription.keys.p256dh)
    .bind(&subscription.keys.auth)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    sqlx::query(
        r#"INSERT INTO client_tokens (endpoint, p256dh, auth, last_seen_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth,
             last_seen_at = excluded.last_seen_at"#,
    )
    .bind(&subscription.endpoint)
    .bind(&subscription.keys.p256dh)
    .bind(&subscription.keys.auth)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn subscriptions_for(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(
        "SELECT endpoint, p256dh, auth FROM notification_subscriptions WHERE appointment_id = ?",
    )
    .bind(appointment_id)
    .fetch_all(pool)
    .await
}

pub async fn registered_tokens(pool: &SqlitePool) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>("SELECT endpoint, p256dh, auth FROM client_tokens")
        .fetch_all(pool)
        .await
}

/// Delivery collaborator boundary. Returns plain success/failure and never
/// errors across it; the scheduler only counts outcomes. Kept as a trait so
/// a retry/outbox transport can replace web-push without touching the
/// window-selection logic.
pub trait Delivery: Send + Sync {
    fn deliver(
        &self,
        subscription: &SubscriptionRow,
        title: &str,
        body: &str,
        data: &Value,
    ) -> impl Future<Output = bool> + Send;
}

#[derive(Clone)]
pub struct WebPushDelivery {
    config: PushConfig,
}

impl WebPushDelivery {
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    async fn send(
        &self,
        subscription: &SubscriptionRow,
        payload: &str,
    ) -> Result<(), WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );
        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

        let mut vapid =
            VapidSignatureBuilder::from_base64(&self.config.private_key, URL_SAFE_NO_PAD, &info)?;
        vapid.add_claim("sub", self.config.subject.clone());
        builder.set_vapid_signature(vapid.build()?);

        let client = IsahcWebPushClient::new()?;
        client.send(builder.build()?).await
    }
}

impl Delivery for WebPushDelivery {
    async fn deliver(
        &self,
        subscription: &SubscriptionRow,
        title: &str,
        body: &str,
        data: &Value,
    ) -> bool {
        if !self.config.enabled() {
            return false;
        }
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "data": data,
        })
        .to_string();

        match self.send(subscription, &payload).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("push send failed: {err}");
                false
            }
        }
    }
}
