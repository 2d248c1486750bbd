//! Admission controller
//!
//! Combines the cooldown policy with the subject store. Per-subject async
//! locks make the check-then-reserve and record sequences atomic for one
//! subject while leaving different subjects independent.
//!
//! With `reserve_on_submit` disabled (the default) usage is only ever
//! recorded after a successful delivery, so a subject may have two requests
//! in flight at once. Enabling it takes an in-flight slot at admission time
//! and denies a second concurrent request until the first finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::Result;
use crate::policy::{Admission, CooldownPolicy};
use crate::store::{SubjectRecord, SubjectStore};

/// Window used for the "active" count in `summary`.
const ACTIVE_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Profile details captured on first contact.
#[derive(Debug, Clone, Default)]
pub struct SubjectProfile {
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// A subject's record together with its current admission decision.
#[derive(Debug, Clone)]
pub struct SubjectStats {
    pub record: SubjectRecord,
    pub admission: Admission,
    pub exempt: bool,
}

/// Aggregate usage across all subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub total_subjects: usize,
    pub total_deliveries: u64,
    pub active_last_24h: usize,
}

pub struct AdmissionController {
    policy: CooldownPolicy,
    store: Arc<dyn SubjectStore>,
    reserve_on_submit: bool,
    /// Entries exist only while some caller holds or waits on the lock.
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Holds one subject's lock; drops the map entry when no one else wants it.
struct SubjectGuard<'a> {
    locks: &'a std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    subject: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only taken under the map lock: the map entry plus ours
        // means no other caller holds or waits on this subject.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.subject);
        }
    }
}

impl AdmissionController {
    pub fn new(policy: CooldownPolicy, store: Arc<dyn SubjectStore>, reserve_on_submit: bool) -> Self {
        info!(
            cooldown_secs = policy.cooldown().as_secs(),
            reserve_on_submit, "admission controller initialized"
        );
        Self {
            policy,
            store,
            reserve_on_submit,
            locks: std::sync::Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    async fn lock_subject(&self, subject: &str) -> SubjectGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(subject.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let mut guard = SubjectGuard {
            locks: &self.locks,
            subject: subject.to_string(),
            lock,
            guard: None,
        };
        guard.guard = Some(guard.lock.clone().lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Create the subject on first contact and count the inbound request.
    pub async fn touch(
        &self,
        subject: &str,
        profile: SubjectProfile,
        now_ms: u64,
    ) -> Result<SubjectRecord> {
        self.store
            .upsert(
                subject,
                now_ms,
                Box::new(move |record: &mut SubjectRecord| {
                    record.total_requests += 1;
                    if profile.username.is_some() {
                        record.username = profile.username;
                    }
                    if profile.display_name.is_some() {
                        record.display_name = profile.display_name;
                    }
                }),
            )
            .await
    }

    /// Evaluate admission without taking a reservation.
    pub async fn check(&self, subject: &str, now_ms: u64) -> Result<Admission> {
        let record = self.store.get(subject).await?;
        Ok(self
            .policy
            .evaluate(subject, now_ms, record.and_then(|r| r.last_usage)))
    }

    /// Evaluate admission and, when reservations are enabled, take the
    /// subject's in-flight slot on `Allowed`.
    pub async fn try_admit(&self, subject: &str, now_ms: u64) -> Result<Admission> {
        let _guard = self.lock_subject(subject).await;

        if self.reserve_on_submit && self.in_flight.lock().await.contains(subject) {
            debug!(subject, "request already in flight");
            return Ok(Admission::InFlight);
        }

        let admission = self.check(subject, now_ms).await?;
        if admission.is_allowed() && self.reserve_on_submit {
            self.in_flight.lock().await.insert(subject.to_string());
        }
        debug!(subject, decision = admission.label(), "admission evaluated");
        Ok(admission)
    }

    /// Record a successful delivery at `now_ms` and release any reservation.
    ///
    /// The reservation is released even when the store write fails.
    pub async fn record(&self, subject: &str, now_ms: u64) -> Result<SubjectRecord> {
        let _guard = self.lock_subject(subject).await;
        let updated = self
            .store
            .upsert(
                subject,
                now_ms,
                Box::new(move |record: &mut SubjectRecord| {
                    record.last_usage = Some(now_ms);
                    record.usage_count += 1;
                }),
            )
            .await;
        self.in_flight.lock().await.remove(subject);
        let updated = updated?;
        info!(subject, usage_count = updated.usage_count, "delivery recorded");
        Ok(updated)
    }

    /// Release a reservation after a failed attempt. Usage is not recorded.
    pub async fn release(&self, subject: &str) {
        let _guard = self.lock_subject(subject).await;
        if self.in_flight.lock().await.remove(subject) {
            debug!(subject, "reservation released");
        }
    }

    /// Stats for one subject, or `None` if it has never made contact.
    pub async fn stats(&self, subject: &str, now_ms: u64) -> Result<Option<SubjectStats>> {
        let Some(record) = self.store.get(subject).await? else {
            return Ok(None);
        };
        let admission = self.policy.evaluate(subject, now_ms, record.last_usage);
        Ok(Some(SubjectStats {
            record,
            admission,
            exempt: self.policy.is_exempt(subject),
        }))
    }

    pub async fn summary(&self, now_ms: u64) -> Result<UsageSummary> {
        let subjects = self.store.list().await?;
        let window_ms = ACTIVE_WINDOW.as_millis() as u64;
        let active_last_24h = subjects
            .iter()
            .filter(|(_, r)| {
                r.last_usage
                    .is_some_and(|t| now_ms.saturating_sub(t) < window_ms)
            })
            .count();
        Ok(UsageSummary {
            total_subjects: subjects.len(),
            total_deliveries: subjects.iter().map(|(_, r)| r.usage_count).sum(),
            active_last_24h,
        })
    }
}
