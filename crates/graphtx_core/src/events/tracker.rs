//! Incremental change tracking for one transaction.
//!
//! The tracker sees every mutation as it happens and keeps, per property
//! slot, the value visible at transaction start (captured lazily on first
//! touch) and the latest value. [`ChangeTracker::snapshot`] folds that state
//! into a [`TransactionData`] by comparing the two ends only, so the order and
//! number of intermediate writes never leak into the result.

use crate::events::data::{PropertyAssignment, PropertyRemoval, TransactionData};
use crate::types::{EntityRef, NodeId, RelationshipId, TransactionId};
use crate::value::PropertyValue;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Read access to the state committed before the transaction began.
///
/// The tracker consults it the first time a property slot is touched and
/// when a pre-existing entity is deleted.
pub trait CommittedState {
    /// Returns the committed value of a property, if any.
    fn property(&self, entity: EntityRef, key: &str) -> Option<PropertyValue>;

    /// Returns all committed properties of an entity, ordered by key.
    fn properties(&self, entity: EntityRef) -> Vec<(String, PropertyValue)>;
}

/// One `(entity, key)` slot touched by the transaction.
#[derive(Debug, Clone)]
struct PropertySlot {
    entity: EntityRef,
    key: String,
    /// Value at transaction start.
    original: Option<PropertyValue>,
    /// Value now.
    current: Option<PropertyValue>,
}

/// Accumulates a transaction's mutations and collapses them into a net diff.
///
/// Owned exclusively by its transaction; no synchronization.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    created_nodes: BTreeSet<NodeId>,
    deleted_nodes: BTreeSet<NodeId>,
    created_relationships: BTreeSet<RelationshipId>,
    deleted_relationships: BTreeSet<RelationshipId>,
    /// Entities created and deleted by this transaction.
    cancelled: HashSet<EntityRef>,
    slots: Vec<PropertySlot>,
    slot_index: HashMap<(EntityRef, String), usize>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the creation of a node.
    pub fn record_node_created(&mut self, id: NodeId) {
        self.created_nodes.insert(id);
    }

    /// Records the deletion of a node.
    ///
    /// A node created by this transaction simply disappears from the diff.
    /// A pre-existing node is reported as deleted and every property it had
    /// at transaction start is reported as removed.
    pub fn record_node_deleted<S>(&mut self, committed: &S, id: NodeId)
    where
        S: CommittedState + ?Sized,
    {
        if self.created_nodes.remove(&id) {
            self.cancelled.insert(EntityRef::Node(id));
        } else {
            self.deleted_nodes.insert(id);
            self.clear_properties(committed, EntityRef::Node(id));
        }
    }

    /// Records the creation of a relationship.
    pub fn record_relationship_created(&mut self, id: RelationshipId) {
        self.created_relationships.insert(id);
    }

    /// Records the deletion of a relationship.
    pub fn record_relationship_deleted<S>(&mut self, committed: &S, id: RelationshipId)
    where
        S: CommittedState + ?Sized,
    {
        if self.created_relationships.remove(&id) {
            self.cancelled.insert(EntityRef::Relationship(id));
        } else {
            self.deleted_relationships.insert(id);
            self.clear_properties(committed, EntityRef::Relationship(id));
        }
    }

    /// Records a property assignment.
    pub fn record_property_set<S>(
        &mut self,
        committed: &S,
        entity: EntityRef,
        key: &str,
        value: PropertyValue,
    ) where
        S: CommittedState + ?Sized,
    {
        self.touch(committed, entity, key).current = Some(value);
    }

    /// Records a property removal. Removing a missing property is harmless.
    pub fn record_property_removed<S>(&mut self, committed: &S, entity: EntityRef, key: &str)
    where
        S: CommittedState + ?Sized,
    {
        self.touch(committed, entity, key).current = None;
    }

    /// Returns the value the transaction currently sees for a touched
    /// property: `Some(value)` if the slot was touched, `None` if the
    /// transaction never touched it and the committed state applies.
    #[must_use]
    pub fn current_property(&self, entity: EntityRef, key: &str) -> Option<Option<&PropertyValue>> {
        self.slot_index
            .get(&(entity, key.to_string()))
            .map(|&i| self.slots[i].current.as_ref())
    }

    /// Touched property slots of one entity with their current values.
    pub fn touched_properties(
        &self,
        entity: EntityRef,
    ) -> impl Iterator<Item = (&str, Option<&PropertyValue>)> + '_ {
        self.slots
            .iter()
            .filter(move |slot| slot.entity == entity)
            .map(|slot| (slot.key.as_str(), slot.current.as_ref()))
    }

    /// Returns true if the node was created by this transaction and still exists.
    #[must_use]
    pub fn is_created_node(&self, id: NodeId) -> bool {
        self.created_nodes.contains(&id)
    }

    /// Returns true if the pre-existing node was deleted by this transaction.
    #[must_use]
    pub fn is_deleted_node(&self, id: NodeId) -> bool {
        self.deleted_nodes.contains(&id)
    }

    /// Returns true if the relationship was created by this transaction and still exists.
    #[must_use]
    pub fn is_created_relationship(&self, id: RelationshipId) -> bool {
        self.created_relationships.contains(&id)
    }

    /// Returns true if the pre-existing relationship was deleted by this transaction.
    #[must_use]
    pub fn is_deleted_relationship(&self, id: RelationshipId) -> bool {
        self.deleted_relationships.contains(&id)
    }

    /// Returns true if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.cancelled.is_empty()
            && self.slots.is_empty()
    }

    /// Materializes the collapsed view of everything recorded so far.
    ///
    /// Pure: calling it again without further mutations yields an equal value.
    #[must_use]
    pub fn snapshot(&self, transaction_id: TransactionId) -> TransactionData {
        let mut assigned_properties = Vec::new();
        let mut removed_properties = Vec::new();

        for slot in &self.slots {
            if self.cancelled.contains(&slot.entity) {
                continue;
            }
            match (&slot.original, &slot.current) {
                (None, None) => {}
                (Some(previous), None) => removed_properties.push(PropertyRemoval {
                    entity: slot.entity,
                    key: slot.key.clone(),
                    previous: previous.clone(),
                }),
                (previous, Some(value)) => {
                    if previous.as_ref() != Some(value) {
                        assigned_properties.push(PropertyAssignment {
                            entity: slot.entity,
                            key: slot.key.clone(),
                            value: value.clone(),
                            previous: previous.clone(),
                        });
                    }
                }
            }
        }

        TransactionData {
            transaction_id,
            created_nodes: self.created_nodes.clone(),
            deleted_nodes: self.deleted_nodes.clone(),
            created_relationships: self.created_relationships.clone(),
            deleted_relationships: self.deleted_relationships.clone(),
            assigned_properties,
            removed_properties,
        }
    }

    fn is_created(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Node(id) => self.created_nodes.contains(&id),
            EntityRef::Relationship(id) => self.created_relationships.contains(&id),
        }
    }

    /// Returns the slot for `(entity, key)`, capturing its original value on
    /// first touch.
    fn touch<S>(&mut self, committed: &S, entity: EntityRef, key: &str) -> &mut PropertySlot
    where
        S: CommittedState + ?Sized,
    {
        let index_key = (entity, key.to_string());
        let index = match self.slot_index.get(&index_key) {
            Some(&i) => i,
            None => {
                let original = if self.is_created(entity) {
                    None
                } else {
                    committed.property(entity, key)
                };
                self.slots.push(PropertySlot {
                    entity,
                    key: key.to_string(),
                    current: original.clone(),
                    original,
                });
                let i = self.slots.len() - 1;
                self.slot_index.insert(index_key, i);
                i
            }
        };
        &mut self.slots[index]
    }

    /// Marks every property of a deleted entity as gone.
    fn clear_properties<S>(&mut self, committed: &S, entity: EntityRef)
    where
        S: CommittedState + ?Sized,
    {
        for slot in self.slots.iter_mut().filter(|s| s.entity == entity) {
            slot.current = None;
        }
        for (key, _) in committed.properties(entity) {
            self.touch(committed, entity, &key).current = None;
        }
    }
}
