use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub push: PushConfig,
    pub booking_locks: BookingLocks,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn from_env() -> Self {
        Self {
            public_key: env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
            private_key: env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
            subject: env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:admin@trimline.local".to_string()),
        }
    }

    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}

/// Per-barber write serialization. Holding the guard across validate+persist
/// closes the check-then-write race between concurrent bookings for the same
/// barber. Distinct barbers never contend.
#[derive(Clone, Default)]
pub struct BookingLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, barber_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(barber_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locks_serialize_same_barber_only() {
        let locks = BookingLocks::new();
        let held = locks.acquire("b1").await;

        // A different barber is not blocked.
        let other = locks.acquire("b2").await;
        drop(other);

        // The same barber is blocked until the guard drops.
        let again = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.acquire("b1"),
        )
        .await;
        assert!(again.is_err());

        drop(held);
        let _ = locks.acquire("b1").await;
    }
}
