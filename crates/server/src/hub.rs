//! Per-job heartbeat tracking and progress fan-out.
//!
//! Every job gets a [`ProgressRecord`] on its first notification and a set of
//! subscriber channels. Delivery is best-effort: a channel that refuses a
//! message (closed or full) is pruned under the same lock that tried to send,
//! so it never sees another message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use falcon_core::{ProgressMessage, Stage};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffered messages per subscriber before it counts as stalled.
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// Heartbeat of one job.
#[derive(Debug, Clone, Copy)]
pub struct ProgressRecord {
    pub last_update: Instant,
    pub stage: Stage,
}

/// Identifies one subscription so it can be removed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A live subscription: its id plus the receiving end of the channel.
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<ProgressMessage>,
}

pub struct NotificationHub {
    stuck_threshold: Duration,
    progress: Mutex<HashMap<Uuid, ProgressRecord>>,
    subscribers: Mutex<HashMap<Uuid, Vec<(SubscriberId, mpsc::Sender<ProgressMessage>)>>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new(stuck_threshold: Duration) -> Self {
        Self {
            stuck_threshold,
            progress: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a bounded channel and register it for `job_id`.
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.attach(job_id, tx);
        Subscription { id, rx }
    }

    /// Register an existing sender for `job_id`.
    pub fn attach(&self, job_id: Uuid, tx: mpsc::Sender<ProgressMessage>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.entry(job_id).or_default().push((id, tx));
        debug!(%job_id, subscriber = id.0, "subscriber attached");
        id
    }

    /// Remove one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, job_id: Uuid, id: SubscriberId) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = subs.get_mut(&job_id) {
            set.retain(|(sid, _)| *sid != id);
            if set.is_empty() {
                subs.remove(&job_id);
            }
        }
    }

    /// Refresh the heartbeat and deliver a progress message to every subscriber.
    pub fn notify(&self, job_id: Uuid, message: &str, stage: Stage) -> ProgressMessage {
        let now = Instant::now();
        let age = {
            let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            let age = progress
                .get(&job_id)
                .map(|r| now.saturating_duration_since(r.last_update))
                .unwrap_or_default();
            progress.insert(job_id, ProgressRecord { last_update: now, stage });
            age
        };

        let is_stuck = !stage.is_terminal() && age > self.stuck_threshold;
        if is_stuck {
            warn!(%job_id, %stage, age_secs = age.as_secs(), "job looks stuck");
        }

        let message = message.trim();
        let msg = ProgressMessage {
            job_id,
            message: if message.is_empty() { stage.as_str().to_string() } else { message.to_string() },
            stage,
            progress_age: age.as_secs_f64(),
            is_stuck,
            timestamp: Utc::now(),
        };

        self.deliver(job_id, &msg);
        msg
    }

    fn deliver(&self, job_id: Uuid, msg: &ProgressMessage) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = subs.get_mut(&job_id) else {
            return;
        };
        let before = set.len();
        set.retain(|(_, tx)| tx.try_send(msg.clone()).is_ok());
        let pruned = before - set.len();
        if pruned > 0 {
            debug!(%job_id, pruned, remaining = set.len(), "pruned failed subscribers");
        }
        if set.is_empty() {
            subs.remove(&job_id);
        }
    }

    pub fn progress(&self, job_id: Uuid) -> Option<ProgressRecord> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .copied()
    }

    /// Heartbeat age past the stuck threshold on a non-terminal stage.
    pub fn is_stuck(&self, job_id: Uuid) -> bool {
        self.progress(job_id).is_some_and(|r| {
            !r.stage.is_terminal() && r.last_update.elapsed() > self.stuck_threshold
        })
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map_or(0, Vec::len)
    }

    /// Drop the heartbeat and every subscriber of `job_id`.
    pub fn remove_job(&self, job_id: Uuid) {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).remove(&job_id);
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> NotificationHub {
        NotificationHub::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_fan_out_keeps_order() {
        let hub = hub();
        let job = Uuid::new_v4();
        let mut a = hub.subscribe(job);
        let mut b = hub.subscribe(job);

        for (msg, stage) in [
            ("Processing started", Stage::Initializing),
            ("Loading page content", Stage::Loading),
            ("Analyzing content with AI", Stage::AiProcessing),
        ] {
            hub.notify(job, msg, stage);
        }

        for sub in [&mut a, &mut b] {
            let stages: Vec<Stage> = (0..3).map(|_| sub.rx.try_recv().unwrap().stage).collect();
            assert_eq!(stages, vec![Stage::Initializing, Stage::Loading, Stage::AiProcessing]);
            assert!(sub.rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let hub = hub();
        let job = Uuid::new_v4();
        let live = hub.subscribe(job);
        let dead = hub.subscribe(job);
        drop(dead.rx);

        hub.notify(job, "one", Stage::Loading);
        assert_eq!(hub.subscriber_count(job), 1);
        drop(live);

        hub.notify(job, "two", Stage::Loading);
        assert_eq!(hub.subscriber_count(job), 0);
        assert!(hub.subscribers.lock().unwrap().get(&job).is_none());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_pruned_and_never_retried() {
        let hub = hub();
        let job = Uuid::new_v4();
        let mut slow = hub.subscribe(job);
        for i in 0..=SUBSCRIBER_CAPACITY {
            hub.notify(job, &format!("msg {i}"), Stage::Loading);
        }
        assert_eq!(hub.subscriber_count(job), 0);

        hub.notify(job, "after prune", Stage::Loading);
        let mut received = 0;
        while let Ok(msg) = slow.rx.try_recv() {
            assert_ne!(msg.message, "after prune");
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let hub = hub();
        let job = Uuid::new_v4();
        hub.notify(job, "early", Stage::Initializing);
        let mut late = hub.subscribe(job);
        assert!(late.rx.try_recv().is_err());
        hub.notify(job, "later", Stage::Loading);
        assert_eq!(late.rx.try_recv().unwrap().message, "later");
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_single_channel() {
        let hub = hub();
        let job = Uuid::new_v4();
        let a = hub.subscribe(job);
        let mut b = hub.subscribe(job);
        hub.unsubscribe(job, a.id);
        hub.unsubscribe(job, a.id);
        assert_eq!(hub.subscriber_count(job), 1);

        hub.notify(job, "hello", Stage::Loading);
        assert_eq!(b.rx.try_recv().unwrap().message, "hello");

        hub.unsubscribe(job, b.id);
        assert_eq!(hub.subscriber_count(job), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_flag_after_threshold() {
        let hub = hub();
        let job = Uuid::new_v4();
        let first = hub.notify(job, "start", Stage::Loading);
        assert!(!first.is_stuck);
        assert_eq!(first.progress_age, 0.0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(hub.is_stuck(job));
        let late = hub.notify(job, "still loading", Stage::Loading);
        assert!(late.is_stuck);
        assert!(late.progress_age >= 61.0);
        assert!(!hub.is_stuck(job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_stage_never_stuck() {
        let hub = hub();
        let job = Uuid::new_v4();
        hub.notify(job, "start", Stage::Loading);
        tokio::time::advance(Duration::from_secs(120)).await;
        let done = hub.notify(job, "Completed!", Stage::Completed);
        assert!(!done.is_stuck);
        assert!(done.progress_age >= 120.0);
    }

    #[tokio::test]
    async fn test_blank_message_uses_stage_label() {
        let hub = hub();
        let msg = hub.notify(Uuid::new_v4(), "   ", Stage::DataProcessing);
        assert_eq!(msg.message, "data_processing");
    }

    #[tokio::test]
    async fn test_remove_job_clears_everything() {
        let hub = hub();
        let job = Uuid::new_v4();
        let _sub = hub.subscribe(job);
        hub.notify(job, "x", Stage::Loading);
        hub.remove_job(job);
        assert!(hub.progress(job).is_none());
        assert_eq!(hub.subscriber_count(job), 0);
    }
}
