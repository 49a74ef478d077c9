//! Immutable description of a transaction's net changes.

use crate::types::{EntityRef, NodeId, RelationshipId, TransactionId};
use crate::value::PropertyValue;
use std::collections::BTreeSet;

/// A property whose value at the end of the transaction differs from its
/// value at the start.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyAssignment {
    /// Entity owning the property.
    pub entity: EntityRef,
    /// Property key.
    pub key: String,
    /// Value visible at transaction end.
    pub value: PropertyValue,
    /// Value visible at transaction start, `None` if the property is new.
    pub previous: Option<PropertyValue>,
}

/// A property that existed at the start of the transaction and does not
/// exist at the end.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRemoval {
    /// Entity owning the property.
    pub entity: EntityRef,
    /// Property key.
    pub key: String,
    /// Value visible at transaction start.
    pub previous: PropertyValue,
}

/// Net changes of one transaction attempt.
///
/// Produced once by [`ChangeTracker::snapshot`](crate::ChangeTracker::snapshot)
/// before the before-commit phase and shared read-only with every handler of
/// the attempt. Entities created and deleted within the same transaction do
/// not appear anywhere, and every property appears in at most one record.
///
/// Node and relationship sets iterate in identity order. Property records are
/// ordered by the first time the property was touched in the transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionData {
    pub(crate) transaction_id: TransactionId,
    pub(crate) created_nodes: BTreeSet<NodeId>,
    pub(crate) deleted_nodes: BTreeSet<NodeId>,
    pub(crate) created_relationships: BTreeSet<RelationshipId>,
    pub(crate) deleted_relationships: BTreeSet<RelationshipId>,
    pub(crate) assigned_properties: Vec<PropertyAssignment>,
    pub(crate) removed_properties: Vec<PropertyRemoval>,
}

impl TransactionData {
    /// Returns the transaction these changes belong to.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Nodes created by the transaction.
    #[must_use]
    pub fn created_nodes(&self) -> &BTreeSet<NodeId> {
        &self.created_nodes
    }

    /// Nodes that existed before the transaction and were deleted by it.
    #[must_use]
    pub fn deleted_nodes(&self) -> &BTreeSet<NodeId> {
        &self.deleted_nodes
    }

    /// Relationships created by the transaction.
    #[must_use]
    pub fn created_relationships(&self) -> &BTreeSet<RelationshipId> {
        &self.created_relationships
    }

    /// Relationships that existed before the transaction and were deleted by it.
    #[must_use]
    pub fn deleted_relationships(&self) -> &BTreeSet<RelationshipId> {
        &self.deleted_relationships
    }

    /// Net property assignments, in first-touch order.
    #[must_use]
    pub fn assigned_properties(&self) -> &[PropertyAssignment] {
        &self.assigned_properties
    }

    /// Net property removals, in first-touch order.
    #[must_use]
    pub fn removed_properties(&self) -> &[PropertyRemoval] {
        &self.removed_properties
    }

    /// Returns true if the node was created by this transaction.
    #[must_use]
    pub fn is_created_node(&self, id: NodeId) -> bool {
        self.created_nodes.contains(&id)
    }

    /// Returns true if the node was deleted by this transaction.
    #[must_use]
    pub fn is_deleted_node(&self, id: NodeId) -> bool {
        self.deleted_nodes.contains(&id)
    }

    /// Returns true if the relationship was created by this transaction.
    #[must_use]
    pub fn is_created_relationship(&self, id: RelationshipId) -> bool {
        self.created_relationships.contains(&id)
    }

    /// Returns true if the relationship was deleted by this transaction.
    #[must_use]
    pub fn is_deleted_relationship(&self, id: RelationshipId) -> bool {
        self.deleted_relationships.contains(&id)
    }

    /// Assignments made to one entity.
    pub fn assigned_properties_of(
        &self,
        entity: EntityRef,
    ) -> impl Iterator<Item = &PropertyAssignment> + '_ {
        self.assigned_properties
            .iter()
            .filter(move |a| a.entity == entity)
    }

    /// Removals made from one entity.
    pub fn removed_properties_of(
        &self,
        entity: EntityRef,
    ) -> impl Iterator<Item = &PropertyRemoval> + '_ {
        self.removed_properties
            .iter()
            .filter(move |r| r.entity == entity)
    }

    /// Returns true if the transaction changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned_properties.is_empty()
            && self.removed_properties.is_empty()
    }

    /// Total number of change records.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.created_nodes.len()
            + self.deleted_nodes.len()
            + self.created_relationships.len()
            + self.deleted_relationships.len()
            + self.assigned_properties.len()
            + self.removed_properties.len()
    }
}
