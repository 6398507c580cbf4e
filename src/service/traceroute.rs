//! # Traceroute Scheduler
//!
//! Periodically maps the mesh by tracing one stale node per tick.
//!
//! Each tick, only while the device link is streaming:
//! 1. abandon pending requests older than the response timeout;
//! 2. ask storage for nodes heard within the active window whose latest traceroute
//!    is missing or older than the expiration;
//! 3. pick the stalest candidate (never traced first) and send one request.
//!
//! Repeat-avoidance comes from the expiration filter plus the set of pending
//! requests, not from any extra lock state. A failed send is logged and the node
//! simply comes up again next tick.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TracerouteConfig;
use crate::error::Result;
use crate::protocol::dispatcher::ProtocolDispatcher;
use crate::storage::{NodeFilter, TracerouteCandidate};
use crate::utils::metrics::global_metrics;
use crate::utils::task::ScheduledTask;
use crate::utils::time::{now_secs, secs_ago};

/// An outstanding traceroute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerouteTask {
    pub destination: u32,
    pub request_id: u32,
    /// Unix seconds the request was sent
    pub started_at: u64,
}

#[derive(Debug, Default)]
struct BookInner {
    pending: HashMap<u32, TracerouteTask>,
    last_attempt: HashMap<u32, u64>,
}

/// Pending traceroute requests, at most one per destination.
#[derive(Debug, Default)]
pub struct TracerouteBook {
    inner: Mutex<BookInner>,
}

impl TracerouteBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BookInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a sent request. Returns `false` if one was already pending for
    /// `destination`; the newer request id replaces it either way.
    pub fn start(&self, destination: u32, request_id: u32, now: u64) -> bool {
        let mut inner = self.lock();
        inner.last_attempt.insert(destination, now);
        inner
            .pending
            .insert(
                destination,
                TracerouteTask {
                    destination,
                    request_id,
                    started_at: now,
                },
            )
            .is_none()
    }

    /// A response from `destination` arrived.
    pub fn complete(&self, destination: u32) -> Option<TracerouteTask> {
        self.lock().pending.remove(&destination)
    }

    /// A routing error answered the request with id `request_id`.
    pub fn fail_by_request(&self, request_id: u32) -> Option<TracerouteTask> {
        if request_id == 0 {
            return None;
        }
        let mut inner = self.lock();
        let destination = inner
            .pending
            .values()
            .find(|t| t.request_id == request_id)
            .map(|t| t.destination)?;
        inner.pending.remove(&destination)
    }

    /// Drop requests started before `now - timeout`.
    pub fn expire(&self, now: u64, timeout: Duration) -> Vec<TracerouteTask> {
        let cutoff = secs_ago(now, timeout);
        let mut inner = self.lock();
        let expired: Vec<TracerouteTask> = inner
            .pending
            .values()
            .filter(|t| t.started_at < cutoff)
            .copied()
            .collect();
        for task in &expired {
            inner.pending.remove(&task.destination);
        }
        expired
    }

    pub fn is_pending(&self, destination: u32) -> bool {
        self.lock().pending.contains_key(&destination)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn last_attempt(&self, destination: u32) -> Option<u64> {
        self.lock().last_attempt.get(&destination).copied()
    }
}

/// Pick the node to trace next.
///
/// Candidates whose latest traceroute is not older than `expired_before` are never
/// chosen, whatever storage returned. Among the rest: never-traced nodes first,
/// then the oldest traceroute, then the oldest attempt, then the lowest node number.
pub fn select_candidate<S, A>(
    candidates: &[TracerouteCandidate],
    expired_before: u64,
    skip: S,
    last_attempt: A,
) -> Option<u32>
where
    S: Fn(u32) -> bool,
    A: Fn(u32) -> Option<u64>,
{
    candidates
        .iter()
        .filter(|c| c.last_traceroute.map_or(true, |ts| ts < expired_before))
        .filter(|c| !skip(c.node.num))
        .min_by_key(|c| {
            (
                c.last_traceroute.is_some(),
                c.last_traceroute.unwrap_or(0),
                last_attempt(c.node.num).unwrap_or(0),
                c.node.num,
            )
        })
        .map(|c| c.node.num)
}

pub struct TracerouteScheduler {
    dispatcher: ProtocolDispatcher,
    config: TracerouteConfig,
    filter: NodeFilter,
}

impl TracerouteScheduler {
    pub fn new(dispatcher: ProtocolDispatcher, config: TracerouteConfig) -> Result<Self> {
        let filter = NodeFilter::from_config(&config.filters)?;
        Ok(Self {
            dispatcher,
            config,
            filter,
        })
    }

    /// Run one scheduling round at unix time `now`. Returns the node traced, if any.
    pub fn tick(&self, now: u64) -> Option<u32> {
        let link = self.dispatcher.link();
        if !link.state().is_streaming() {
            debug!(state = %link.state(), "Skipping traceroute tick");
            return None;
        }

        let book = self.dispatcher.traceroute_book();
        for task in book.expire(now, self.config.response_timeout) {
            global_metrics().traceroute_expired();
            info!(destination = task.destination, "Traceroute timed out");
        }

        let expired_before = secs_ago(now, self.config.expiration);
        let candidates = match self.dispatcher.storage().get_stale_traceroute_candidates(
            secs_ago(now, self.config.active_window),
            expired_before,
            &self.filter,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load traceroute candidates");
                return None;
            }
        };

        let own = self.dispatcher.my_node_num();
        let destination = select_candidate(
            &candidates,
            expired_before,
            |num| Some(num) == own || book.is_pending(num),
            |num| book.last_attempt(num),
        )?;

        match self.dispatcher.send_traceroute(
            destination,
            self.config.hop_limit,
            self.config.channel,
        ) {
            Ok(id) => {
                info!(
                    destination,
                    id,
                    candidates = candidates.len(),
                    "Traceroute sent"
                );
                Some(destination)
            }
            Err(e) => {
                warn!(destination, error = %e, "Traceroute send failed, retrying next tick");
                None
            }
        }
    }

    /// Run [`tick`](Self::tick) every `interval` until cancelled.
    pub fn spawn(self) -> ScheduledTask {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            hop_limit = self.config.hop_limit,
            "Traceroute scheduler started"
        );
        ScheduledTask::spawn("traceroute-scheduler", move |cancel| async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick(now_secs());
                    }
                }
            }
            debug!("Traceroute scheduler stopped");
        })
    }
}
