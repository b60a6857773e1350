//! Durable record of trigger rule occurrences, used by frequency caps.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::{
    models::{OccurrenceInterval, TriggerRuleOccurrence},
    storage::{self, DurableStore, TRIGGER_RULE_OCCURRENCES_KEY},
    Result,
};

type Occurrences = HashMap<String, Vec<DateTime<Utc>>>;

/// Keeps a timestamp per recorded occurrence, keyed by occurrence key.
pub(crate) struct OccurrenceStore {
    store: Arc<dyn DurableStore>,
    occurrences: RwLock<Occurrences>,
    /// Serializes durable writes so that a snapshot is never persisted out of order.
    write_gate: Mutex<()>,
}

impl OccurrenceStore {
    /// Load previously recorded occurrences from `store`.
    pub(crate) async fn load(store: Arc<dyn DurableStore>) -> Result<OccurrenceStore> {
        let occurrences = storage::read_typed::<Occurrences>(&*store, TRIGGER_RULE_OCCURRENCES_KEY)
            .await?
            .unwrap_or_default();
        Ok(OccurrenceStore {
            store,
            occurrences: RwLock::new(occurrences),
            write_gate: Mutex::new(()),
        })
    }

    /// Number of occurrences recorded for `occurrence.key` within its interval ending at `now`.
    pub(crate) fn count(&self, occurrence: &TriggerRuleOccurrence, now: DateTime<Utc>) -> usize {
        let Ok(occurrences) = self.occurrences.read() else {
            return 0;
        };
        let Some(timestamps) = occurrences.get(&occurrence.key) else {
            return 0;
        };
        match occurrence.interval {
            OccurrenceInterval::Infinity => timestamps.len(),
            OccurrenceInterval::Minutes(minutes) => {
                let since = now - Duration::minutes(i64::from(minutes));
                timestamps.iter().filter(|t| **t >= since).count()
            }
        }
    }

    /// Record one occurrence unless `occurrence.max_count` is already reached within the
    /// interval ending at `now`. Returns whether the occurrence was recorded.
    ///
    /// The check and the record happen under the write gate, so concurrent callers can never
    /// exceed the cap. Timestamps that can no longer affect the count are dropped.
    ///
    /// An `Err` means the occurrence was recorded in memory but could not be persisted.
    pub(crate) async fn try_record(
        &self,
        occurrence: &TriggerRuleOccurrence,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let snapshot = {
            let Ok(mut occurrences) = self.occurrences.write() else {
                return Ok(false);
            };
            let timestamps = occurrences.entry(occurrence.key.clone()).or_default();
            prune(timestamps, occurrence, now);
            if timestamps.len() >= occurrence.max_count as usize {
                return Ok(false);
            }
            timestamps.push(now);
            occurrences.clone()
        };
        storage::write_typed(&self.store, TRIGGER_RULE_OCCURRENCES_KEY, &snapshot).await?;
        Ok(true)
    }

    /// Forget every recorded occurrence.
    pub(crate) async fn clear(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if let Ok(mut occurrences) = self.occurrences.write() {
            occurrences.clear();
        }
        storage::remove_detached(&self.store, TRIGGER_RULE_OCCURRENCES_KEY).await
    }
}

/// Drop timestamps outside the interval. Without an interval only the newest `max_count`
/// timestamps matter.
fn prune(
    timestamps: &mut Vec<DateTime<Utc>>,
    occurrence: &TriggerRuleOccurrence,
    now: DateTime<Utc>,
) {
    match occurrence.interval {
        OccurrenceInterval::Infinity => {
            let max_count = occurrence.max_count as usize;
            if timestamps.len() > max_count {
                timestamps.drain(..timestamps.len() - max_count);
            }
        }
        OccurrenceInterval::Minutes(minutes) => {
            let since = now - Duration::minutes(i64::from(minutes));
            timestamps.retain(|t| *t >= since);
        }
    }
}
