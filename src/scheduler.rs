use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Idle,
    Saving,
    Success,
    Error,
}

/// What should happen once the save in flight resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FollowUp {
    /// Edits arrived mid-flight: start a fresh quiet period.
    Debounce,
    /// A manual save was requested mid-flight: fire right away.
    Immediate,
}

/// Trailing-edge debounce with a single owned deadline and single-flight
/// save discipline. Time is passed in so callers (and tests) control the
/// clock.
#[derive(Debug)]
pub struct SaveScheduler {
    quiet_period: Duration,
    status: SaveStatus,
    deadline: Option<Instant>,
    in_flight: Option<u64>,
    follow_up: Option<FollowUp>,
    next_job: u64,
    last_error: Option<String>,
}

impl SaveScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            status: SaveStatus::Idle,
            deadline: None,
            in_flight: None,
            follow_up: None,
            next_job: 1,
            last_error: None,
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// An accepted edit. Restarts the quiet period, or queues a follow-up
    /// cycle if a save is already out.
    pub fn note_edit(&mut self, now: Instant) {
        if self.in_flight.is_some() {
            self.follow_up = self.follow_up.max(Some(FollowUp::Debounce));
            return;
        }
        self.status = SaveStatus::Idle;
        self.last_error = None;
        self.deadline = Some(now + self.quiet_period);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.in_flight.is_none() && self.deadline.is_some_and(|d| now >= d)
    }

    /// Manual save. Returns `false` when it had to be queued behind the
    /// save in flight.
    pub fn request_now(&mut self) -> bool {
        if self.in_flight.is_some() {
            self.follow_up = Some(FollowUp::Immediate);
            return false;
        }
        self.deadline = None;
        true
    }

    pub fn begin(&mut self) -> u64 {
        let job = self.next_job;
        self.next_job += 1;
        self.deadline = None;
        self.in_flight = Some(job);
        self.status = SaveStatus::Saving;
        self.last_error = None;
        job
    }

    /// The deadline fired but the draft had nothing to send.
    pub fn settle_noop(&mut self) {
        self.deadline = None;
        self.status = SaveStatus::Idle;
    }

    /// Validation failed: nothing is sent and the status shows the error.
    pub fn block(&mut self, reason: impl Into<String>) {
        self.deadline = None;
        self.status = SaveStatus::Error;
        self.last_error = Some(reason.into());
    }

    /// Resolves the save in flight. Outcomes for any other job id are
    /// ignored and `false` is returned.
    pub fn finish(&mut self, job: u64, outcome: Result<(), String>, now: Instant) -> bool {
        if self.in_flight != Some(job) {
            return false;
        }
        self.in_flight = None;
        match outcome {
            Ok(()) => {
                self.status = SaveStatus::Success;
                self.last_error = None;
            }
            Err(reason) => {
                self.status = SaveStatus::Error;
                self.last_error = Some(reason);
            }
        }
        self.deadline = match self.follow_up.take() {
            Some(FollowUp::Immediate) => Some(now),
            Some(FollowUp::Debounce) => Some(now + self.quiet_period),
            None => None,
        };
        true
    }

    /// Teardown: drop the pending deadline and any queued follow-up.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.follow_up = None;
    }
}
