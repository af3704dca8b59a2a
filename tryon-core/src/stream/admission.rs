//! Admission control toward the remote processor.
//!
//! Every captured job asks the [`AdmissionController`] for a slot before
//! it may reach the transport. The controller tracks dispatched jobs with
//! a deadline so a hung exchange eventually gives its slot back.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::stream::types::FrameJob;

// ── AdmissionPolicy ──────────────────────────────────────────────

/// How many jobs may be outstanding at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// At most one dispatched job.
    SingleFlight,
    /// At most `N` dispatched jobs; the newest job is dropped on overflow.
    BoundedQueue(usize),
}

impl AdmissionPolicy {
    /// Maximum number of concurrently dispatched jobs.
    pub fn capacity(self) -> usize {
        match self {
            AdmissionPolicy::SingleFlight => 1,
            AdmissionPolicy::BoundedQueue(n) => n.max(1),
        }
    }
}

impl std::fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleFlight => write!(f, "single-flight"),
            Self::BoundedQueue(n) => write!(f, "bounded-queue({n})"),
        }
    }
}

// ── Admission ────────────────────────────────────────────────────

/// Outcome of [`AdmissionController::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Dropped,
}

// ── InFlight ─────────────────────────────────────────────────────

/// A dispatched job awaiting its result.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    dispatched_at: Instant,
    deadline: Duration,
}

impl InFlight {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.dispatched_at) > self.deadline
    }
}

// ── AdmissionController ──────────────────────────────────────────

#[derive(Debug)]
pub struct AdmissionController {
    policy: AdmissionPolicy,
    timeout: Duration,
    /// Dispatched jobs keyed by sequence (ordered, oldest first).
    in_flight: BTreeMap<u64, InFlight>,
}

impl AdmissionController {
    /// `timeout` bounds how long a dispatched job may hold its slot.
    pub fn new(policy: AdmissionPolicy, timeout: Duration) -> Self {
        Self {
            policy,
            timeout,
            in_flight: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Number of jobs currently dispatched.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `sequence` currently holds a slot.
    pub fn is_in_flight(&self, sequence: u64) -> bool {
        self.in_flight.contains_key(&sequence)
    }

    /// Accept the job (marking it `Dispatched`) or drop it (marking it
    /// `Dropped` and releasing its payload). Never displaces a job that is
    /// already in flight.
    pub fn try_admit(&mut self, job: &mut FrameJob, now: Instant) -> Admission {
        if self.in_flight.len() >= self.policy.capacity() {
            debug!(
                sequence = job.sequence,
                in_flight = self.in_flight.len(),
                policy = %self.policy,
                "admission full; dropping newest job"
            );
            let _ = job.mark_dropped();
            return Admission::Dropped;
        }

        if job.mark_dispatched().is_err() {
            return Admission::Dropped;
        }
        self.in_flight.insert(
            job.sequence,
            InFlight {
                dispatched_at: now,
                deadline: self.timeout,
            },
        );
        Admission::Accepted
    }

    /// Release the slot held by `sequence`.
    ///
    /// Returns the round-trip time, or `None` if the sequence was not in
    /// flight (already expired, abandoned, or never admitted).
    pub fn complete(&mut self, sequence: u64, now: Instant) -> Option<Duration> {
        self.in_flight
            .remove(&sequence)
            .map(|slot| now.saturating_duration_since(slot.dispatched_at))
    }

    /// Release every slot whose deadline has passed, oldest first.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &expired {
            self.in_flight.remove(seq);
        }
        expired
    }

    /// Forget every in-flight job. Returns how many were abandoned.
    pub fn abandon_all(&mut self) -> usize {
        let n = self.in_flight.len();
        self.in_flight.clear();
        n
    }
}

// ── Tests ────────────────────────────────────────────────────────
