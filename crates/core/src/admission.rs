//! Job id admission.
//!
//! Registration jobs use a two-phase protocol: an id is first registered in
//! the [`AdmissionLedger`], then claimed by the upload request that carries
//! it. Claiming is a single check-and-remove under one lock, so two requests
//! racing on the same id can never both be admitted.
//!
//! Transform jobs skip pre-registration and take the next id from a
//! [`JobIdGenerator`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::JobError;
use crate::types::{JobId, JOB_ID_FIELD};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Ids registered and waiting for their upload request.
#[derive(Debug)]
pub struct AdmissionLedger {
    inner: Mutex<LedgerInner>,
    /// Entries older than this are treated as absent. `None` keeps them forever.
    ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    last_id: JobId,
    ready: HashMap<JobId, Instant>,
}

impl AdmissionLedger {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            ttl,
        }
    }

    /// Register a fresh id and return it.
    pub fn register(&self) -> JobId {
        let mut inner = self.lock();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.ready.insert(id, Instant::now());
        tracing::debug!(job_id = id, "Job registered in admission ledger");
        id
    }

    /// Register a caller-chosen id. Returns `false` if it is already waiting.
    pub fn register_id(&self, id: JobId) -> bool {
        let mut inner = self.lock();
        inner.last_id = inner.last_id.max(id);
        if inner.ready.contains_key(&id) {
            return false;
        }
        inner.ready.insert(id, Instant::now());
        true
    }

    /// Atomically find `id` and remove it.
    ///
    /// Fails if the id was never registered, has already been claimed, or
    /// has expired. An expired entry is dropped as a side effect.
    pub fn claim(&self, id: JobId) -> Result<(), JobError> {
        let mut inner = self.lock();
        match inner.ready.remove(&id) {
            Some(registered_at) if self.is_expired(registered_at) => Err(JobError::Admission(
                format!("Job {id} registration has expired"),
            )),
            Some(_) => Ok(()),
            None => Err(JobError::Admission(format!(
                "Job {id} has not been queued before"
            ))),
        }
    }

    /// Number of ids waiting to be claimed, expired ones included.
    pub fn pending(&self) -> usize {
        self.lock().ready.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.ready.len();
        inner.ready.retain(|_, registered_at| !self.is_expired(*registered_at));
        before - inner.ready.len()
    }

    fn is_expired(&self, registered_at: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| registered_at.elapsed() > ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Id generator
// ---------------------------------------------------------------------------

/// Monotonic id source for kinds without pre-registration. First id is 1.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last: AtomicU64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> JobId {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How a job kind turns an incoming request into an admitted job id.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The request must carry an id previously registered in the ledger.
    Ledger(Arc<AdmissionLedger>),
    /// The server assigns the id; any client-supplied id is ignored.
    Sequential(Arc<JobIdGenerator>),
}

impl Admission {
    /// Resolve the request's raw `id` value into an admitted job id.
    pub fn resolve(&self, requested: Option<&str>) -> Result<JobId, JobError> {
        match self {
            Self::Ledger(ledger) => {
                let raw = requested.ok_or_else(|| {
                    JobError::Admission("Job has no id, request will not be processed".into())
                })?;
                let id = parse_job_id(raw)?;
                ledger.claim(id)?;
                Ok(id)
            }
            Self::Sequential(ids) => Ok(ids.next_id()),
        }
    }

    /// The ledger behind this policy, if it uses one.
    pub fn ledger(&self) -> Option<&Arc<AdmissionLedger>> {
        match self {
            Self::Ledger(ledger) => Some(ledger),
            Self::Sequential(_) => None,
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, JobError> {
    raw.trim()
        .parse::<JobId>()
        .map_err(|e| JobError::InvalidField {
            field: JOB_ID_FIELD.into(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn registered_id_is_claimed_once() {
        let ledger = AdmissionLedger::new(None);
        let id = ledger.register();
        assert_eq!(ledger.pending(), 1);

        assert!(ledger.claim(id).is_ok());
        assert_matches!(ledger.claim(id), Err(JobError::Admission(_)));
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let ledger = AdmissionLedger::new(None);
        assert_matches!(ledger.claim(42), Err(JobError::Admission(_)));
    }

    #[test]
    fn registered_ids_are_monotonic_after_explicit_ids() {
        let ledger = AdmissionLedger::new(None);
        assert!(ledger.register_id(7));
        assert!(!ledger.register_id(7));
        assert_eq!(ledger.register(), 8);
    }

    #[test]
    fn expired_entries_are_rejected_and_purged() {
        let ledger = AdmissionLedger::new(Some(Duration::ZERO));
        let id = ledger.register();
        std::thread::sleep(Duration::from_millis(5));
        assert_matches!(ledger.claim(id), Err(JobError::Admission(msg)) if msg.contains("expired"));

        ledger.register();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ledger.purge_expired(), 1);
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn racing_claims_admit_exactly_one() {
        let ledger = Arc::new(AdmissionLedger::new(None));
        let id = ledger.register();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.claim(id).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("claim thread panicked"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn generator_starts_at_one_and_increments() {
        let ids = JobIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn ledger_policy_requires_an_id() {
        let admission = Admission::Ledger(Arc::new(AdmissionLedger::new(None)));
        assert_matches!(admission.resolve(None), Err(JobError::Admission(_)));
        assert_matches!(
            admission.resolve(Some("seven")),
            Err(JobError::InvalidField { field, .. }) if field == "id"
        );
    }

    #[test]
    fn sequential_policy_ignores_client_id() {
        let admission = Admission::Sequential(Arc::new(JobIdGenerator::new()));
        assert_eq!(admission.resolve(Some("99")).expect("assigned"), 1);
        assert_eq!(admission.resolve(None).expect("assigned"), 2);
    }
}
