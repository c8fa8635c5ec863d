//! Per-aggregate version tracking for optimistic concurrency.
//!
//! The catalogue is the only mutable state the kernel shares between
//! concurrent commands. It keeps one entry per known aggregate, holding the
//! highest committed version and whether a writer currently holds a
//! reservation. Entries live in a [`DashMap`], so writers contend only on the
//! shard their aggregate hashes to; unrelated aggregates never share a lock.
//!
//! A writer follows a two-phase protocol:
//!
//! 1. [`check_and_reserve`](AggregateCatalogue::check_and_reserve) with the
//!    version its decision was based on. At most one writer per aggregate
//!    holds a reservation at a time.
//! 2. [`commit`](AggregateCatalogue::commit) the new version once the events
//!    are durable, or [`rollback`](AggregateCatalogue::rollback) if the append
//!    failed.
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::{AggregateId, Error, Result};

#[derive(Debug, Default, Clone, Copy)]
struct CatalogueEntry {
    version: i64,
    owner: Option<Uuid>,
}

/// Tracks the current version of every known aggregate.
///
/// An aggregate without an entry is at version 0. Versions only increase.
///
/// Every reservation has an owner. [`check_and_reserve`] takes one on behalf
/// of an anonymous owner; [`reserve`] names the owner, typically the id of
/// the [`EventBatch`](crate::bus::EventBatch) that will carry the events, so
/// that the log can tell the batch holding a reservation apart from any other
/// batch touching the same aggregate.
///
/// [`check_and_reserve`]: AggregateCatalogue::check_and_reserve
/// [`reserve`]: AggregateCatalogue::reserve
#[derive(Debug, Default)]
pub struct AggregateCatalogue {
    entries: DashMap<AggregateId, CatalogueEntry>,
}

impl AggregateCatalogue {
    /// Creates an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed version of an aggregate, or 0 if it is unknown.
    pub fn current_version(&self, aggregate_id: &AggregateId) -> i64 {
        self.entries.get(aggregate_id).map_or(0, |e| e.version)
    }

    /// Atomically checks that the aggregate is at `expected_version` and
    /// reserves the next version for the caller.
    ///
    /// Fails with [`Error::Conflict`] if the version differs or another
    /// writer already holds a reservation. In the latter case `actual` is
    /// the version that writer is about to produce.
    pub fn check_and_reserve(&self, aggregate_id: &AggregateId, expected_version: i64) -> Result<()> {
        self.reserve(aggregate_id, expected_version, Uuid::new_v4())
    }

    /// Like [`check_and_reserve`](Self::check_and_reserve), recording `owner`
    /// as the holder of the reservation.
    #[instrument(skip(self), fields(aggregate.id = %aggregate_id))]
    pub fn reserve(&self, aggregate_id: &AggregateId, expected_version: i64, owner: Uuid) -> Result<()> {
        let conflict = |actual| Error::Conflict {
            aggregate_id: aggregate_id.clone(),
            expected: expected_version,
            actual,
        };

        match self.entries.entry(aggregate_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.owner.is_some() {
                    debug!(version = entry.version, "reservation already held");
                    return Err(conflict(entry.version + 1));
                }
                if entry.version != expected_version {
                    return Err(conflict(entry.version));
                }
                entry.owner = Some(owner);
            }
            Entry::Vacant(vacant) => {
                if expected_version != 0 {
                    return Err(conflict(0));
                }
                vacant.insert(CatalogueEntry {
                    version: 0,
                    owner: Some(owner),
                });
            }
        }
        trace!(%owner, "reserved");
        Ok(())
    }

    /// Finalizes a reservation, making `new_version` visible.
    ///
    /// Fails with [`Error::NotReserved`] if no reservation is held and with
    /// [`Error::VersionRegression`] if `new_version` is below the visible
    /// version; the reservation is kept in that case so the caller can still
    /// roll back.
    pub fn commit(&self, aggregate_id: &AggregateId, new_version: i64) -> Result<()> {
        self.settle(aggregate_id, None, Some(new_version))
    }

    /// Like [`commit`](Self::commit), but only for a reservation held by
    /// `owner`.
    pub fn commit_owned(&self, aggregate_id: &AggregateId, owner: Uuid, new_version: i64) -> Result<()> {
        self.settle(aggregate_id, Some(owner), Some(new_version))
    }

    /// Releases a reservation, leaving the visible version unchanged.
    pub fn rollback(&self, aggregate_id: &AggregateId) -> Result<()> {
        self.settle(aggregate_id, None, None)
    }

    /// Like [`rollback`](Self::rollback), but only for a reservation held by
    /// `owner`.
    pub fn rollback_owned(&self, aggregate_id: &AggregateId, owner: Uuid) -> Result<()> {
        self.settle(aggregate_id, Some(owner), None)
    }

    /// Commits (`Some(version)`) or rolls back (`None`) a held reservation,
    /// optionally requiring a particular owner.
    #[instrument(skip(self), fields(aggregate.id = %aggregate_id))]
    fn settle(&self, aggregate_id: &AggregateId, owner: Option<Uuid>, new_version: Option<i64>) -> Result<()> {
        let Entry::Occupied(occupied) = self.entries.entry(aggregate_id.clone()) else {
            return Err(Error::NotReserved(aggregate_id.clone()));
        };
        let held = *occupied.get();
        match (held.owner, owner) {
            (None, _) => return Err(Error::NotReserved(aggregate_id.clone())),
            (Some(holder), Some(owner)) if holder != owner => {
                return Err(Error::NotReserved(aggregate_id.clone()));
            }
            _ => {}
        }

        match new_version {
            Some(version) if version < held.version => Err(Error::VersionRegression {
                aggregate_id: aggregate_id.clone(),
                current: held.version,
                proposed: version,
            }),
            Some(version) => {
                let mut entry = occupied.into_ref();
                entry.version = version;
                entry.owner = None;
                trace!(version, "committed");
                Ok(())
            }
            // Entries created by a reservation on an unknown aggregate go
            // back to being absent.
            None if held.version == 0 => {
                occupied.remove();
                trace!("rolled back");
                Ok(())
            }
            None => {
                occupied.into_ref().owner = None;
                trace!("rolled back");
                Ok(())
            }
        }
    }

    /// Records a version observed elsewhere, e.g. in the event store.
    ///
    /// The catalogue only moves forward: lower versions are ignored.
    pub fn observe(&self, aggregate_id: &AggregateId, version: i64) {
        let mut entry = self.entries.entry(aggregate_id.clone()).or_default();
        if version > entry.version {
            trace!(aggregate.id = %aggregate_id, version, "observed newer version");
            entry.version = version;
        }
    }

    /// Returns the version a held reservation was taken against.
    pub fn reserved_version(&self, aggregate_id: &AggregateId) -> Option<i64> {
        self.reservation(aggregate_id).map(|(version, _)| version)
    }

    /// Returns the version a held reservation was taken against together
    /// with its owner.
    pub fn reservation(&self, aggregate_id: &AggregateId) -> Option<(i64, Uuid)> {
        self.entries
            .get(aggregate_id)
            .and_then(|e| e.owner.map(|owner| (e.version, owner)))
    }

    /// Returns the instance ids of every aggregate of the given type that has
    /// at least one committed event, sorted.
    pub fn aggregate_ids(&self, aggregate_type: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| e.key().aggregate_type() == aggregate_type && e.value().version > 0)
            .map(|e| e.key().instance_id())
            .collect();
        ids.sort_unstable();
        ids
    }
}
