//! The hazard currently shown on the dashboard.
//!
//! Every selection request takes a ticket before it starts fetching. A
//! result is only applied if its ticket is still the newest one, so a slow
//! fetch for an earlier selection can never overwrite a later one. Changes
//! are published on a watch channel.

use crate::error::Result;
use crate::hazard::PreparedHazard;
use crate::matcher::{find_affected, MatchPolicy};
use crate::store::FileStore;
use crate::types::{Accident, Affected, AffectedHousehold, Household};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket(u64);

impl SelectionTicket {
    pub fn generation(self) -> u64 {
        self.0
    }
}

/// Derived state for the selected hazard. Never persisted.
#[derive(Debug)]
pub struct ActiveHazard {
    pub generation: u64,
    pub hazard: PreparedHazard,
    pub households: Vec<Household>,
    pub affected: Vec<AffectedHousehold>,
    pub affected_accidents: Vec<Affected<Accident>>,
}

impl ActiveHazard {
    /// Fetches a hazard together with the current household and accident
    /// records and matches them. Everything is recomputed from scratch.
    pub async fn load(
        store: &FileStore,
        hazard_id: &str,
        policy: MatchPolicy,
        max_bytes: usize,
        generation: u64,
    ) -> Result<Self> {
        let (record, households, accidents) = tokio::try_join!(
            store.load_hazard(hazard_id),
            store.load_households(),
            store.load_accidents(),
        )?;

        let active = tokio::task::spawn_blocking(move || -> Result<Self> {
            let hazard = PreparedHazard::prepare(&record, max_bytes)?;
            let legend = hazard.legend.as_ref();
            let affected = find_affected(&households, &hazard.layer, legend, policy);
            let affected_accidents = find_affected(&accidents, &hazard.layer, legend, policy);
            Ok(Self {
                generation,
                hazard,
                households,
                affected,
                affected_accidents,
            })
        })
        .await??;

        info!(
            hazard = %active.hazard.summary.id,
            generation,
            households = active.households.len(),
            affected = active.affected.len(),
            accidents = active.affected_accidents.len(),
            "computed affected records"
        );
        Ok(active)
    }
}

pub struct HazardSelection {
    generation: AtomicU64,
    tx: watch::Sender<Option<Arc<ActiveHazard>>>,
}

impl Default for HazardSelection {
    fn default() -> Self {
        Self::new()
    }
}

impl HazardSelection {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            generation: AtomicU64::new(0),
            tx,
        }
    }

    /// Starts a new selection request, superseding any in flight.
    pub fn begin(&self) -> SelectionTicket {
        SelectionTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: SelectionTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Publishes `active` if `ticket` is still the latest request. Returns
    /// whether it was applied.
    pub fn commit(&self, ticket: SelectionTicket, active: ActiveHazard) -> bool {
        let active = Arc::new(active);
        let applied = self.tx.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != ticket.0 {
                return false;
            }
            *current = Some(active.clone());
            true
        });
        if !applied {
            debug!(generation = ticket.0, "dropping superseded selection");
        }
        applied
    }

    pub fn current(&self) -> Option<Arc<ActiveHazard>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ActiveHazard>>> {
        self.tx.subscribe()
    }
}
