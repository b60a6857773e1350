//! Confirmed and unconfirmed experiment assignments.
//!
//! Confirmed assignments are durable: they are written through the injected [`DurableStore`] and
//! reloaded on start. Unconfirmed assignments are candidates chosen on every configuration
//! refresh and only live in memory until the presentation pipeline confirms them.
//!
//! Lock order is always `confirmed` then `unconfirmed`. In-memory locks are never held across an
//! await point.
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::{
    models::{Assignments, ExperimentId, Variant},
    storage::{self, DurableStore, CONFIRMED_ASSIGNMENTS_KEY},
    Result,
};

/// An assignment resolved from the unconfirmed map that has not been durably recorded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmableAssignment {
    pub experiment_id: ExperimentId,
    pub variant: Variant,
}

/// Where a resolved variant came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AssignmentLookup {
    Confirmed(Variant),
    Unconfirmed(Variant),
}

pub struct AssignmentStore {
    store: Arc<dyn DurableStore>,
    confirmed: RwLock<Assignments>,
    unconfirmed: RwLock<Assignments>,
    /// Serializes confirmations and resets so that durable snapshots are written in order.
    write_gate: Mutex<()>,
}

impl AssignmentStore {
    /// Load confirmed assignments from `store`. The unconfirmed map starts empty.
    pub async fn load(store: Arc<dyn DurableStore>) -> Result<AssignmentStore> {
        let confirmed = storage::read_typed::<Assignments>(&*store, CONFIRMED_ASSIGNMENTS_KEY)
            .await?
            .unwrap_or_default();
        log::debug!(target: "paywall", count = confirmed.len(); "loaded confirmed assignments");
        Ok(AssignmentStore {
            store,
            confirmed: RwLock::new(confirmed),
            unconfirmed: RwLock::new(Assignments::new()),
            write_gate: Mutex::new(()),
        })
    }

    /// Snapshot of all confirmed assignments.
    pub fn confirmed_assignments(&self) -> Assignments {
        self.confirmed
            .read()
            .map(|confirmed| confirmed.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all unconfirmed assignments.
    pub fn unconfirmed_assignments(&self) -> Assignments {
        self.unconfirmed
            .read()
            .map(|unconfirmed| unconfirmed.clone())
            .unwrap_or_default()
    }

    /// Resolve the variant for `experiment_id`. Confirmed assignments take priority.
    pub(crate) fn lookup(&self, experiment_id: &str) -> Option<AssignmentLookup> {
        // Holding the confirmed read lock while reading the unconfirmed map keeps the lookup
        // consistent with a concurrent confirmation of the same experiment.
        let confirmed = self.confirmed.read().ok()?;
        if let Some(variant) = confirmed.get(experiment_id) {
            return Some(AssignmentLookup::Confirmed(variant.clone()));
        }
        let unconfirmed = self.unconfirmed.read().ok()?;
        unconfirmed
            .get(experiment_id)
            .cloned()
            .map(AssignmentLookup::Unconfirmed)
    }

    /// Replace the unconfirmed map wholesale. Experiments that are already confirmed are
    /// dropped from `assignments`.
    pub fn replace_unconfirmed(&self, mut assignments: Assignments) {
        let Ok(confirmed) = self.confirmed.read() else {
            return;
        };
        assignments.retain(|experiment_id, _| !confirmed.contains_key(experiment_id));
        if let Ok(mut unconfirmed) = self.unconfirmed.write() {
            *unconfirmed = assignments;
        }
    }

    /// Durably record `assignment` as confirmed.
    ///
    /// Confirming an experiment that is already confirmed is a no-op: the first confirmed
    /// variant stays until [`AssignmentStore::reset`]. The returned future resolves after the
    /// write is durable. The write itself runs on its own task, so dropping the future after
    /// this call started does not tear the write. If the write fails, the confirmation is undone
    /// in memory as well and the error is returned.
    pub async fn confirm(&self, assignment: &ConfirmableAssignment) -> Result<()> {
        let _gate = self.write_gate.lock().await;

        let snapshot = {
            let Ok(mut confirmed) = self.confirmed.write() else {
                return Ok(());
            };
            if let Ok(mut unconfirmed) = self.unconfirmed.write() {
                unconfirmed.remove(&assignment.experiment_id);
            }

            match confirmed.get(&assignment.experiment_id) {
                Some(existing) if existing == &assignment.variant => {
                    log::trace!(target: "paywall",
                                experiment_id = assignment.experiment_id.as_str();
                                "assignment already confirmed");
                    return Ok(());
                }
                Some(existing) => {
                    log::warn!(target: "paywall",
                               experiment_id = assignment.experiment_id.as_str(),
                               confirmed_variant = existing.id.as_str(),
                               pending_variant = assignment.variant.id.as_str();
                               "experiment already confirmed with a different variant, \
                                keeping the confirmed one");
                    return Ok(());
                }
                None => {}
            }

            confirmed.insert(assignment.experiment_id.clone(), assignment.variant.clone());
            confirmed.clone()
        };

        let written = storage::write_typed(&self.store, CONFIRMED_ASSIGNMENTS_KEY, &snapshot).await;
        if let Err(err) = written {
            self.roll_back(assignment);
            return Err(err);
        }
        log::debug!(target: "paywall",
                    experiment_id = assignment.experiment_id.as_str(),
                    variant_id = assignment.variant.id.as_str();
                    "confirmed assignment");
        Ok(())
    }

    /// Undo the in-memory part of a confirmation whose durable write failed, so that memory never
    /// claims more than the store holds. The candidate goes back to the unconfirmed map unless a
    /// newer candidate took its place.
    fn roll_back(&self, assignment: &ConfirmableAssignment) {
        let Ok(mut confirmed) = self.confirmed.write() else {
            return;
        };
        confirmed.remove(&assignment.experiment_id);
        if let Ok(mut unconfirmed) = self.unconfirmed.write() {
            unconfirmed
                .entry(assignment.experiment_id.clone())
                .or_insert_with(|| assignment.variant.clone());
        }
    }

    /// Forget confirmed and unconfirmed assignments.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        {
            if let Ok(mut confirmed) = self.confirmed.write() {
                confirmed.clear();
            }
            if let Ok(mut unconfirmed) = self.unconfirmed.write() {
                unconfirmed.clear();
            }
        }
        storage::remove_detached(&self.store, CONFIRMED_ASSIGNMENTS_KEY).await
    }
}
