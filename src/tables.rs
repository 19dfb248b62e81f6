//! In-memory counter and detail tables.
//!
//! Details reference their counter by id (arena style). The foreign key is
//! checked here: a detail can only be created for an existing counter, and a
//! counter can only be removed once it owns no details.

use crate::error::{Result, StoreError};
use crate::subscriptions::Change;
use crate::types::{Counter, CounterDetail, CounterId, DetailId, Mutation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All persisted entities plus id allocation state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tables {
    counters: BTreeMap<CounterId, Counter>,
    details: BTreeMap<DetailId, CounterDetail>,
    next_counter_id: u64,
    next_detail_id: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            counters: BTreeMap::new(),
            details: BTreeMap::new(),
            next_counter_id: 1,
            next_detail_id: 1,
        }
    }
}

impl Tables {
    /// Id the next created counter will get.
    pub fn peek_counter_id(&self) -> CounterId {
        CounterId(self.next_counter_id)
    }

    /// Id the next created detail will get.
    pub fn peek_detail_id(&self) -> DetailId {
        DetailId(self.next_detail_id)
    }

    pub fn counter(&self, id: CounterId) -> Option<&Counter> {
        self.counters.get(&id)
    }

    pub fn detail(&self, id: DetailId) -> Option<&CounterDetail> {
        self.details.get(&id)
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn detail_count(&self) -> usize {
        self.details.len()
    }

    /// Counters by creation time, ties broken by id.
    pub fn counters_sorted(&self) -> Vec<Counter> {
        let mut counters: Vec<Counter> = self.counters.values().cloned().collect();
        counters.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        counters
    }

    /// Details of one counter by name, ties broken by id.
    pub fn details_sorted(&self, counter: CounterId) -> Vec<CounterDetail> {
        let mut details: Vec<CounterDetail> = self
            .details
            .values()
            .filter(|d| d.counter == counter)
            .cloned()
            .collect();
        details.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        details
    }

    /// Ids of every detail owned by `counter`.
    pub fn detail_ids_of(&self, counter: CounterId) -> Vec<DetailId> {
        self.details
            .values()
            .filter(|d| d.counter == counter)
            .map(|d| d.id)
            .collect()
    }

    /// Apply one mutation, returning the resulting change.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<Change> {
        match mutation {
            Mutation::CreateCounter {
                id,
                name,
                timestamp,
            } => {
                let counter = Counter {
                    id: *id,
                    name: name.clone(),
                    timestamp: *timestamp,
                };
                self.counters.insert(*id, counter.clone());
                self.next_counter_id = self.next_counter_id.max(id.0 + 1);
                Ok(Change::CounterCreated { counter })
            }

            Mutation::CreateDetail {
                id,
                counter,
                name,
                count,
            } => {
                if !self.counters.contains_key(counter) {
                    return Err(StoreError::CounterNotFound(*counter));
                }
                let detail = CounterDetail {
                    id: *id,
                    counter: *counter,
                    name: name.clone(),
                    count: *count,
                };
                self.details.insert(*id, detail.clone());
                self.next_detail_id = self.next_detail_id.max(id.0 + 1);
                Ok(Change::DetailCreated { detail })
            }

            Mutation::SetCount { id, count } => {
                let detail = self
                    .details
                    .get_mut(id)
                    .ok_or(StoreError::DetailNotFound(*id))?;
                detail.count = *count;
                Ok(Change::DetailUpdated {
                    detail: detail.clone(),
                })
            }

            Mutation::DeleteDetail { id } => {
                let detail = self
                    .details
                    .remove(id)
                    .ok_or(StoreError::DetailNotFound(*id))?;
                Ok(Change::DetailDeleted {
                    id: *id,
                    counter: detail.counter,
                })
            }

            Mutation::DeleteCounter { id } => {
                if !self.counters.contains_key(id) {
                    return Err(StoreError::CounterNotFound(*id));
                }
                if self.details.values().any(|d| d.counter == *id) {
                    return Err(StoreError::Corruption(format!(
                        "counter {} still owns details",
                        id
                    )));
                }
                self.counters.remove(id);
                Ok(Change::CounterDeleted { id: *id })
            }
        }
    }

    /// Apply a batch in order, stopping at the first failure.
    ///
    /// Mutations before the failing one stay applied, so callers that need
    /// all or nothing apply the batch to a copy.
    pub fn apply_all(&mut self, mutations: &[Mutation]) -> Result<Vec<Change>> {
        mutations.iter().map(|m| self.apply(m)).collect()
    }
}
