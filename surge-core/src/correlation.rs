//! Matching fire-and-forget requests to the responses that arrive on a separate stream.

use std::borrow::Cow;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::template::{single_capture_group, splice};
use crate::transport::MessageConsumer;

pub const DEFAULT_CORRELATION_PATTERN: &str = r#""messageId": (.+?),"#;
pub const DEFAULT_FINISHED_MARKER: &str = r#""finished": true"#;
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(8);
pub const DEFAULT_EVICTION_AGE: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_ID_RANGE: RangeInclusive<u64> = 100_000_000..=199_999_999;

/// Knobs for async scenarios.
#[derive(Debug, Clone)]
pub struct AsyncSettings {
    /// One capture group: where the id sits in outbound and inbound payloads.
    pub correlation: Regex,
    /// Present only in the response to a script's final step.
    pub finished_marker: String,
    /// How long a step waits for its response. Independent of the step timeout.
    pub wait_budget: Duration,
    pub eviction_age: Duration,
    pub sweep_period: Duration,
    pub poll_interval: Duration,
    pub id_range: RangeInclusive<u64>,
}

impl AsyncSettings {
    pub fn new(correlation_pattern: &str) -> Result<Self> {
        let correlation = Regex::new(correlation_pattern)?;
        single_capture_group(&correlation)?;

        Ok(Self {
            correlation,
            finished_marker: DEFAULT_FINISHED_MARKER.to_string(),
            wait_budget: DEFAULT_WAIT_BUDGET,
            eviction_age: DEFAULT_EVICTION_AGE,
            sweep_period: DEFAULT_EVICTION_AGE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            id_range: DEFAULT_ID_RANGE,
        })
    }

    pub fn extract_id<'a>(&self, payload: &'a str) -> Option<&'a str> {
        self.correlation
            .captures(payload)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Writes `id` over the correlation span of `template`; unchanged when there is none.
    pub fn substitute_id<'a>(&self, template: &'a str, id: &str) -> Cow<'a, str> {
        match self
            .correlation
            .captures(template)
            .and_then(|caps| caps.get(1))
        {
            Some(m) => Cow::Owned(splice(template, vec![(m.range(), id)])),
            None => Cow::Borrowed(template),
        }
    }

    pub fn is_finished(&self, payload: &str) -> bool {
        payload.contains(self.finished_marker.as_str())
    }
}

/// Inbound payloads keyed by correlation id, awaiting their waiter.
#[derive(Debug)]
pub struct CorrelationStore {
    payloads: DashMap<String, Bytes>,
    arrivals: DashMap<String, Instant>,
    poll_interval: Duration,
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl CorrelationStore {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            payloads: DashMap::new(),
            arrivals: DashMap::new(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Stores `payload` under `id`. A repeated id silently replaces the earlier entry.
    pub fn insert(&self, id: impl Into<String>, payload: Bytes) {
        // Lock order for every paired update: the `payloads` shard, then `arrivals`.
        let slot = self.payloads.entry(id.into());
        self.arrivals.insert(slot.key().clone(), Instant::now());
        slot.insert(payload);
    }

    /// Extracts the id from an inbound message and stores it. Returns the id, if any.
    pub fn ingest(&self, correlation: &Regex, payload: Bytes) -> Option<String> {
        let text = String::from_utf8_lossy(&payload);
        let Some(id) = correlation
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        else {
            tracing::debug!(payload = %text, "inbound message has no correlation id; dropped");
            return None;
        };
        self.insert(id.clone(), payload);
        Some(id)
    }

    /// Removes and returns the payload for `id` if it is already here.
    pub fn take(&self, id: &str) -> Option<Bytes> {
        let (_, payload) = self.payloads.remove_if(id, |key, _| {
            self.arrivals.remove(key);
            true
        })?;
        Some(payload)
    }

    /// Polls for `id` until it arrives or `timeout` passes. On timeout nothing is removed.
    pub async fn wait_for_message(&self, id: &str, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.take(id) {
                return Some(payload);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Drops every entry that arrived more than `age` ago. Returns how many went.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .arrivals
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) > age)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            // Re-check under the payload lock: the id may have been refreshed since the scan.
            let removed = self.payloads.remove_if(&id, |key, _| {
                self.arrivals
                    .remove_if(key, |_, at| now.saturating_duration_since(*at) > age)
                    .is_some()
            });
            if removed.is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn contains(&self, id: &str) -> bool {
        self.payloads.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Feeds the store from `consumer` until the stream ends or `cancel` fires, then
    /// hands the consumer back.
    pub fn spawn_ingestion(
        self: &Arc<Self>,
        mut consumer: Box<dyn MessageConsumer>,
        correlation: Regex,
        cancel: CancellationToken,
    ) -> JoinHandle<Box<dyn MessageConsumer>> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = consumer.next() => next,
                };
                match next {
                    Some(Ok(payload)) => {
                        store.ingest(&correlation, payload);
                    }
                    Some(Err(err)) => tracing::warn!(error = %err, "inbound stream error"),
                    None => {
                        tracing::debug!("inbound stream ended");
                        break;
                    }
                }
            }
            consumer
        })
    }

    /// Sweeps stale entries every `period` until `cancel` fires.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        period: Duration,
        age: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = store.evict_older_than(age);
                        if evicted > 0 {
                            tracing::debug!(evicted, "evicted stale correlation entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn settings() -> AsyncSettings {
        AsyncSettings::new(DEFAULT_CORRELATION_PATTERN).unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn substitute_and_extract_use_the_same_span() {
        let s = settings();
        let out = s.substitute_id(r#"{"messageId": 0, "op": "buy"}"#, "123456789");
        assert_eq!(out, r#"{"messageId": 123456789, "op": "buy"}"#);
        assert_eq!(s.extract_id(&out), Some("123456789"));

        assert!(matches!(s.substitute_id("no id here", "1"), Cow::Borrowed(_)));
    }

    #[test]
    fn correlation_pattern_needs_one_group() {
        assert!(AsyncSettings::new("messageId").is_err());
        assert!(AsyncSettings::new("(").is_err());
    }

    #[test]
    fn ingest_drops_messages_without_id() {
        let s = settings();
        let store = CorrelationStore::default();
        assert_eq!(store.ingest(&s.correlation, Bytes::from_static(b"{}")), None);
        assert!(store.is_empty());

        let id = store.ingest(&s.correlation, Bytes::from_static(br#"{"messageId": 42, "x": 1}"#));
        assert_eq!(id.as_deref(), Some("42"));
        assert!(store.contains("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_waiter_wins_and_both_maps_are_cleared() {
        let store = Arc::new(CorrelationStore::default());
        store.insert("7", Bytes::from_static(b"payload"));

        let a = store.wait_for_message("7", Duration::from_secs(1));
        let b = store.wait_for_message("7", Duration::from_secs(1));
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert!(store.is_empty());
        assert!(store.arrivals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_without_removing_anything() {
        let store = CorrelationStore::default();
        store.insert("other", Bytes::new());

        let started = Instant::now();
        assert!(store.wait_for_message("7", Duration::from_millis(350)).await.is_none());
        assert_eq!(started.elapsed(), Duration::from_millis(350));
        assert!(store.contains("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_arrival_is_picked_up_by_polling() {
        let store = Arc::new(CorrelationStore::default());
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            writer.insert("9", Bytes::from_static(b"late"));
        });

        let got = store.wait_for_message("9", Duration::from_secs(8)).await;
        assert_eq!(got.as_deref(), Some(&b"late"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_sweeps_stale_entries_from_both_maps() {
        let store = Arc::new(CorrelationStore::default());
        let cancel = CancellationToken::new();
        let sweeper =
            store.spawn_eviction(Duration::from_secs(10), Duration::from_secs(10), cancel.clone());

        store.insert("old", Bytes::new());
        tokio::time::sleep(Duration::from_secs(15)).await;
        store.insert("fresh", Bytes::new());
        assert!(store.contains("old"), "exactly at the threshold is not stale yet");

        // Age threshold plus one sweep period.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!store.contains("old"));
        assert!(!store.arrivals.contains_key("old"));
        assert!(store.contains("fresh"));
        assert!(store.arrivals.contains_key("fresh"));

        cancel.cancel();
        sweeper.await.unwrap_or_else(|e| panic!("{e:#}"));
    }

    fn assert_maps_agree(store: &CorrelationStore, id: &str, round: usize) {
        assert_eq!(
            store.payloads.contains_key(id),
            store.arrivals.contains_key(id),
            "maps disagree on `{id}` after round {round}"
        );
    }

    #[test]
    fn duplicate_delivery_racing_a_take_keeps_both_maps_in_step() {
        let store = CorrelationStore::default();
        let barrier = Barrier::new(2);

        for round in 0..5_000 {
            store.insert("x", Bytes::from_static(b"first"));
            std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    store.take("x");
                });
                s.spawn(|| {
                    barrier.wait();
                    store.insert("x", Bytes::from_static(b"dup"));
                });
            });
            assert_maps_agree(&store, "x", round);
            store.take("x");
        }
        assert!(store.arrivals.is_empty());
    }

    #[test]
    fn fresh_arrival_racing_a_sweep_keeps_both_maps_in_step() {
        let store = CorrelationStore::default();
        let barrier = Barrier::new(2);

        for round in 0..5_000 {
            store.insert("x", Bytes::from_static(b"stale"));
            std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    store.evict_older_than(Duration::ZERO);
                });
                s.spawn(|| {
                    barrier.wait();
                    store.insert("x", Bytes::from_static(b"fresh"));
                });
            });
            assert_maps_agree(&store, "x", round);
            store.take("x");
        }
    }
}
