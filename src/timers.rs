//! Timer records, retry backoff, and the scheduler bookkeeping.
//!
//! The scheduler owns every live timer's record and does the arithmetic for
//! pause, resume, reset, and snapshot/restore. It never spawns tasks itself;
//! the engine spawns the delay tasks and hands their handles back, so the
//! scheduler stays synchronous and lock-friendly.

use crate::core::stage::Stage;
use crate::core::state::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Version identifier for the timer snapshot format.
pub const TIMER_SNAPSHOT_VERSION: u32 = 1;

/// Identity of a timer: the stage it was armed in, the stage it fires into,
/// and the declared delay. Stable across re-entries of the same stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub stage: String,
    pub target: String,
    pub duration: Duration,
}

/// Bounded exponential backoff for failed timer firings.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the initial attempt before the timer is dropped.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any retry delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`. The shift is clamped so large attempt numbers
    /// cannot overflow.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Live bookkeeping for one armed timer.
struct TimerRecord {
    id: Uuid,
    duration: Duration,
    started_at: Instant,
    /// Time left when last paused; authoritative only while `paused`.
    remaining: Duration,
    paused: bool,
    retry_count: u32,
    handle: Option<JoinHandle<()>>,
}

impl TimerRecord {
    fn live_remaining(&self, now: Instant) -> Duration {
        if self.paused {
            self.remaining
        } else {
            self.remaining
                .saturating_sub(now.saturating_duration_since(self.started_at))
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// One timer inside a snapshot, delays flattened to milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub id: Uuid,
    pub stage: String,
    pub target: String,
    pub duration_ms: u64,
    pub remaining_ms: u64,
    pub paused: bool,
}

/// Serializable snapshot of all live timers, anchored to wall-clock time so
/// elapsed time across a restart can be deducted on restore.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimerStateSnapshot {
    pub version: u32,
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub timers: Vec<TimerSnapshot>,
}

impl TimerStateSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        if self.version != TIMER_SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.version,
                supported: TIMER_SNAPSHOT_VERSION,
            });
        }
        for timer in &self.timers {
            if timer.stage.is_empty() || timer.target.is_empty() {
                return Err(SnapshotError::ValidationFailed(
                    "timer with empty stage or target".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Record keeper for live timers.
///
/// All methods are synchronous; the engine holds the only reference and runs
/// the actual delays as spawned tasks whose handles are attached here so
/// teardown can abort them.
pub struct TimerScheduler {
    records: Mutex<HashMap<TimerKey, TimerRecord>>,
    policy: RetryPolicy,
}

impl TimerScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerKey, TimerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create records for a stage's timed transitions and return the keys to
    /// arm, in deterministic order (ascending delay, then target name).
    pub fn plan_stage(&self, stage: &Stage) -> Vec<(TimerKey, Duration)> {
        let now = Instant::now();
        let mut records = self.lock();
        let mut planned = Vec::new();
        for (duration, transition) in stage.timed_transitions() {
            let key = TimerKey {
                stage: stage.name.clone(),
                target: transition.target.clone(),
                duration,
            };
            records.insert(
                key.clone(),
                TimerRecord {
                    id: Uuid::new_v4(),
                    duration,
                    started_at: now,
                    remaining: duration,
                    paused: false,
                    retry_count: 0,
                    handle: None,
                },
            );
            planned.push((key, duration));
        }
        planned
    }

    /// Attach the spawned delay task to its record. A record that vanished
    /// in the meantime (stage already left) gets its task aborted instead.
    pub fn attach_handle(&self, key: &TimerKey, handle: JoinHandle<()>) {
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) => {
                record.abort();
                record.handle = Some(handle);
            }
            None => handle.abort(),
        }
    }

    /// Whether the timer is still live and unpaused, checked at fire time.
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        let records = self.lock();
        records.get(key).map(|r| !r.paused).unwrap_or(false)
    }

    /// Drop one timer, aborting its task.
    pub fn remove(&self, key: &TimerKey) {
        let mut records = self.lock();
        if let Some(mut record) = records.remove(key) {
            record.abort();
        }
    }

    /// Drop every timer armed in `stage`.
    pub fn clear_stage(&self, stage: &str) {
        let mut records = self.lock();
        records.retain(|key, record| {
            if key.stage == stage {
                record.abort();
                false
            } else {
                true
            }
        });
    }

    /// Drop all timers.
    pub fn clear_all(&self) {
        let mut records = self.lock();
        for record in records.values_mut() {
            record.abort();
        }
        records.clear();
    }

    /// Cancel the timer from `stage` into `target`, if one is live.
    /// Returns whether a timer was cancelled.
    pub fn cancel(&self, stage: &str, target: &str) -> bool {
        let mut records = self.lock();
        let key = records
            .keys()
            .find(|k| k.stage == stage && k.target == target)
            .cloned();
        match key {
            Some(key) => {
                if let Some(mut record) = records.remove(&key) {
                    record.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Freeze every active timer in `stage`, banking its remaining time and
    /// aborting its task. Already paused timers are untouched.
    pub fn pause_stage(&self, stage: &str) {
        let now = Instant::now();
        let mut records = self.lock();
        for (key, record) in records.iter_mut() {
            if key.stage == stage && !record.paused {
                record.remaining = record.live_remaining(now);
                record.paused = true;
                record.abort();
            }
        }
    }

    /// Unfreeze paused timers in `stage`. Returns the keys and banked
    /// remaining delays for the engine to respawn.
    pub fn resume_stage(&self, stage: &str) -> Vec<(TimerKey, Duration)> {
        let now = Instant::now();
        let mut records = self.lock();
        let mut resumed = Vec::new();
        for (key, record) in records.iter_mut() {
            if key.stage == stage && record.paused {
                record.paused = false;
                record.started_at = now;
                resumed.push((key.clone(), record.remaining));
            }
        }
        resumed.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.target.cmp(&b.0.target)));
        resumed
    }

    /// Restart every timer in `stage` from its full declared delay. Returns
    /// the keys and full delays for the engine to respawn.
    pub fn reset_stage(&self, stage: &str) -> Vec<(TimerKey, Duration)> {
        let now = Instant::now();
        let mut records = self.lock();
        let mut reset = Vec::new();
        for (key, record) in records.iter_mut() {
            if key.stage == stage {
                record.abort();
                record.paused = false;
                record.started_at = now;
                record.remaining = record.duration;
                record.retry_count = 0;
                reset.push((key.clone(), record.duration));
            }
        }
        reset.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.target.cmp(&b.0.target)));
        reset
    }

    /// Smallest remaining delay among `stage`'s timers, or `None` when the
    /// stage has no live timers.
    pub fn remaining_for_stage(&self, stage: &str) -> Option<Duration> {
        let now = Instant::now();
        let records = self.lock();
        records
            .iter()
            .filter(|(key, _)| key.stage == stage)
            .map(|(_, record)| record.live_remaining(now))
            .min()
    }

    /// True when `stage` has timers and every one of them is paused.
    pub fn stage_paused(&self, stage: &str) -> bool {
        let records = self.lock();
        let mut any = false;
        for (key, record) in records.iter() {
            if key.stage == stage {
                if !record.paused {
                    return false;
                }
                any = true;
            }
        }
        any
    }

    /// Bump and return the retry count for a timer that failed to fire.
    /// `None` when the record is gone.
    pub fn note_retry(&self, key: &TimerKey) -> Option<u32> {
        let mut records = self.lock();
        records.get_mut(key).map(|record| {
            record.retry_count += 1;
            record.retry_count
        })
    }

    /// Snapshot every live timer with its remaining delay, anchored to the
    /// current wall-clock time.
    pub fn snapshot(&self) -> TimerStateSnapshot {
        let now = Instant::now();
        let records = self.lock();
        let mut timers: Vec<TimerSnapshot> = records
            .iter()
            .map(|(key, record)| TimerSnapshot {
                id: record.id,
                stage: key.stage.clone(),
                target: key.target.clone(),
                duration_ms: key.duration.as_millis() as u64,
                remaining_ms: record.live_remaining(now).as_millis() as u64,
                paused: record.paused,
            })
            .collect();
        timers.sort_by(|a, b| {
            a.stage
                .cmp(&b.stage)
                .then_with(|| a.remaining_ms.cmp(&b.remaining_ms))
                .then_with(|| a.target.cmp(&b.target))
        });
        TimerStateSnapshot {
            version: TIMER_SNAPSHOT_VERSION,
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            timers,
        }
    }

    /// Rebuild records for `stage` from a snapshot, deducting the wall-clock
    /// time elapsed since the snapshot was taken from unpaused timers.
    /// Existing timers for the stage are dropped first. Returns the keys and
    /// adjusted delays for the engine to respawn (paused timers are restored
    /// but not respawned).
    pub fn restore_into(&self, stage: &str, snapshot: &TimerStateSnapshot) -> Vec<(TimerKey, Duration)> {
        let elapsed = Utc::now()
            .signed_duration_since(snapshot.taken_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let now = Instant::now();

        let mut records = self.lock();
        records.retain(|key, record| {
            if key.stage == stage {
                record.abort();
                false
            } else {
                true
            }
        });

        let mut respawn = Vec::new();
        for timer in snapshot.timers.iter().filter(|t| t.stage == stage) {
            let saved = Duration::from_millis(timer.remaining_ms);
            let remaining = if timer.paused {
                saved
            } else {
                saved.saturating_sub(elapsed)
            };
            let key = TimerKey {
                stage: timer.stage.clone(),
                target: timer.target.clone(),
                duration: Duration::from_millis(timer.duration_ms),
            };
            records.insert(
                key.clone(),
                TimerRecord {
                    id: timer.id,
                    duration: Duration::from_millis(timer.duration_ms),
                    started_at: now,
                    remaining,
                    paused: timer.paused,
                    retry_count: 0,
                    handle: None,
                },
            );
            if !timer.paused {
                respawn.push((key, remaining));
            }
        }
        respawn.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.target.cmp(&b.0.target)));
        respawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransitionDef;
    use tokio::time::{advance, Duration as TokioDuration};

    fn timed_stage() -> Stage {
        Stage::new("waiting")
            .transition(TransitionDef::after(Duration::from_millis(500), "slow"))
            .transition(TransitionDef::after(Duration::from_millis(200), "fast"))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(7), Duration::from_secs(5));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn backoff_zero_attempt_is_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn plan_orders_by_delay_then_target() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        let planned = scheduler.plan_stage(&timed_stage());

        let order: Vec<&str> = planned.iter().map(|(k, _)| k.target.as_str()).collect();
        assert_eq!(order, vec!["fast", "slow"]);
        assert_eq!(planned[0].1, Duration::from_millis(200));
        assert!(scheduler.is_armed(&planned[0].0));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stage_drops_only_that_stage() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());
        scheduler.plan_stage(
            &Stage::new("other").transition(TransitionDef::after(Duration::from_secs(1), "slow")),
        );

        scheduler.clear_stage("waiting");
        assert!(scheduler.remaining_for_stage("waiting").is_none());
        assert!(scheduler.remaining_for_stage("other").is_some());

        scheduler.clear_all();
        assert!(scheduler.remaining_for_stage("other").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_tracks_elapsed_time() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());

        advance(TokioDuration::from_millis(150)).await;
        assert_eq!(
            scheduler.remaining_for_stage("waiting"),
            Some(Duration::from_millis(50))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_banks_remaining_and_resume_returns_it() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());

        advance(TokioDuration::from_millis(100)).await;
        scheduler.pause_stage("waiting");
        assert!(scheduler.stage_paused("waiting"));

        // Paused timers ignore the passage of time.
        advance(TokioDuration::from_secs(60)).await;
        assert_eq!(
            scheduler.remaining_for_stage("waiting"),
            Some(Duration::from_millis(100))
        );

        let resumed = scheduler.resume_stage("waiting");
        assert!(!scheduler.stage_paused("waiting"));
        let delays: Vec<Duration> = resumed.iter().map(|(_, d)| *d).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(400)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_is_idempotent() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());

        advance(TokioDuration::from_millis(100)).await;
        scheduler.pause_stage("waiting");
        advance(TokioDuration::from_millis(100)).await;
        scheduler.pause_stage("waiting");

        assert_eq!(
            scheduler.remaining_for_stage("waiting"),
            Some(Duration::from_millis(100))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_full_delays() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());

        advance(TokioDuration::from_millis(150)).await;
        let reset = scheduler.reset_stage("waiting");

        let delays: Vec<Duration> = reset.iter().map(|(_, d)| *d).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(200), Duration::from_millis(500)]
        );
        assert_eq!(
            scheduler.remaining_for_stage("waiting"),
            Some(Duration::from_millis(200))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stage_paused_is_false_with_no_timers_or_mixed_state() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        assert!(!scheduler.stage_paused("waiting"));

        scheduler.plan_stage(&timed_stage());
        assert!(!scheduler.stage_paused("waiting"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_targets_one_timer() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());

        assert!(scheduler.cancel("waiting", "fast"));
        assert!(!scheduler.cancel("waiting", "fast"));
        assert_eq!(
            scheduler.remaining_for_stage("waiting"),
            Some(Duration::from_millis(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn note_retry_counts_up() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        let planned = scheduler.plan_stage(&timed_stage());
        let key = &planned[0].0;

        assert_eq!(scheduler.note_retry(key), Some(1));
        assert_eq!(scheduler.note_retry(key), Some(2));

        scheduler.remove(key);
        assert_eq!(scheduler.note_retry(key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_round_trips_through_both_encodings() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());
        advance(TokioDuration::from_millis(50)).await;

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.timers.len(), 2);
        assert_eq!(snapshot.timers[0].remaining_ms, 150);
        assert_eq!(snapshot.timers[1].remaining_ms, 450);

        let json = snapshot.to_json().unwrap();
        let from_json = TimerStateSnapshot::from_json(&json).unwrap();
        assert_eq!(from_json.id, snapshot.id);

        let bytes = snapshot.to_bytes().unwrap();
        let from_bytes = TimerStateSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(from_bytes.timers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_version_mismatch_is_rejected() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        let mut snapshot = scheduler.snapshot();
        snapshot.version = 9;

        let json = serde_json::to_string(&snapshot).unwrap();
        let err = TimerStateSnapshot::from_json(&json).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rearms_unpaused_and_parks_paused() {
        let scheduler = TimerScheduler::new(RetryPolicy::default());
        scheduler.plan_stage(&timed_stage());
        scheduler.cancel("waiting", "slow");
        scheduler.plan_stage(
            &Stage::new("waiting2")
                .transition(TransitionDef::after(Duration::from_millis(300), "next")),
        );
        scheduler.pause_stage("waiting2");

        let snapshot = scheduler.snapshot();
        scheduler.clear_all();

        let respawn = scheduler.restore_into("waiting", &snapshot);
        assert_eq!(respawn.len(), 1);
        assert_eq!(respawn[0].0.target, "fast");
        assert!(respawn[0].1 <= Duration::from_millis(200));

        let respawn = scheduler.restore_into("waiting2", &snapshot);
        assert!(respawn.is_empty());
        assert!(scheduler.stage_paused("waiting2"));
        assert_eq!(
            scheduler.remaining_for_stage("waiting2"),
            Some(Duration::from_millis(300))
        );
    }
}
