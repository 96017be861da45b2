//! In-memory fakes shared across test modules.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{MeteringError, MeteringResult};
use crate::notify::{NotificationChannel, UsageSnapshot, WarningEvent};
use crate::store::SubscriptionStore;
use crate::subscriptions::{SubscriptionRecord, SubscriptionStatus};
use crate::usage::{UsageEvent, UsageLedger};
use appforge_shared::Tier;

/// Fake read-side store with switchable failure injection.
#[derive(Default)]
pub struct FakeSubscriptionStore {
    subscriptions: Mutex<HashMap<Uuid, SubscriptionRecord>>,
    app_counts: Mutex<HashMap<Uuid, i64>>,
    credentials: Mutex<HashSet<Uuid>>,
    fail: AtomicBool,
}

impl FakeSubscriptionStore {
    pub fn insert_subscription(&self, record: SubscriptionRecord) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(record.user_id, record);
    }

    pub fn set_app_count(&self, user_id: Uuid, count: i64) {
        self.app_counts.lock().unwrap().insert(user_id, count);
    }

    pub fn set_credentials_configured(&self, user_id: Uuid, configured: bool) {
        let mut creds = self.credentials.lock().unwrap();
        if configured {
            creds.insert(user_id);
        } else {
            creds.remove(&user_id);
        }
    }

    /// Make every read fail, simulating an unreachable database.
    pub fn fail_reads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check_failure(&self) -> MeteringResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(MeteringError::Counter("injected store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SubscriptionStore for FakeSubscriptionStore {
    async fn find_for_user(&self, user_id: Uuid) -> MeteringResult<Option<SubscriptionRecord>> {
        self.check_failure()?;
        Ok(self.subscriptions.lock().unwrap().get(&user_id).cloned())
    }

    async fn app_count(&self, user_id: Uuid) -> MeteringResult<i64> {
        self.check_failure()?;
        Ok(*self.app_counts.lock().unwrap().get(&user_id).unwrap_or(&0))
    }

    async fn byok_credentials_configured(&self, user_id: Uuid) -> MeteringResult<bool> {
        self.check_failure()?;
        Ok(self.credentials.lock().unwrap().contains(&user_id))
    }
}

/// Build an active subscription record for tests.
pub fn active_subscription(user_id: Uuid, tier: Tier) -> SubscriptionRecord {
    let now = OffsetDateTime::now_utc();
    SubscriptionRecord {
        id: Uuid::new_v4(),
        user_id,
        tier,
        status: SubscriptionStatus::Active,
        current_period_start: Some(now),
        current_period_end: if tier == Tier::Free {
            None
        } else {
            Some(now + time::Duration::days(30))
        },
        auto_renew: true,
        scheduled_tier: None,
        scheduled_change_date: None,
        amount_paid_cents: tier.limits().price_cents.unwrap_or(0),
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Channel that records every push for assertions.
#[derive(Default)]
pub struct CaptureChannel {
    pub snapshots: Mutex<Vec<(Uuid, UsageSnapshot)>>,
    pub warnings: Mutex<Vec<(Uuid, WarningEvent)>>,
}

#[async_trait]
impl NotificationChannel for CaptureChannel {
    async fn push_snapshot(&self, user_id: Uuid, snapshot: &UsageSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .push((user_id, snapshot.clone()));
    }

    async fn push_warning(&self, user_id: Uuid, event: &WarningEvent) {
        self.warnings.lock().unwrap().push((user_id, event.clone()));
    }
}

/// Ledger that records events instead of writing to Postgres.
#[derive(Default)]
pub struct CaptureLedger {
    pub events: Mutex<Vec<UsageEvent>>,
}

#[async_trait]
impl UsageLedger for CaptureLedger {
    async fn record(&self, event: UsageEvent) {
        self.events.lock().unwrap().push(event);
    }
}
