//! Committed in-memory graph state.

use crate::error::{CoreError, CoreResult};
use crate::events::{CommittedState, TransactionData};
use crate::types::{EntityRef, NodeId, RelationshipId};
use crate::value::PropertyValue;
use std::collections::{BTreeMap, HashMap};

/// A committed node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRecord {
    /// Properties by key.
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A committed (or pending) relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
    /// Relationship type name.
    pub rel_type: String,
    /// Properties by key.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl RelationshipRecord {
    /// Creates a relationship record without properties.
    pub fn new(start: NodeId, end: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            start,
            end,
            rel_type: rel_type.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Returns true if `node` is either endpoint.
    #[must_use]
    pub fn touches(&self, node: NodeId) -> bool {
        self.start == node || self.end == node
    }
}

/// Nodes and relationships visible to new transactions.
///
/// The store only changes by applying a committed [`TransactionData`], so
/// what handlers saw is exactly what was written.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: HashMap<NodeId, NodeRecord>,
    relationships: HashMap<RelationshipId, RelationshipRecord>,
}

impl GraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a committed node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    /// Returns a committed relationship.
    #[must_use]
    pub fn relationship(&self, id: RelationshipId) -> Option<&RelationshipRecord> {
        self.relationships.get(&id)
    }

    /// Returns true if the node is committed.
    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Returns true if the relationship is committed.
    #[must_use]
    pub fn contains_relationship(&self, id: RelationshipId) -> bool {
        self.relationships.contains_key(&id)
    }

    /// Number of committed nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of committed relationships.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Returns the property map of an entity, if the entity exists.
    #[must_use]
    pub fn properties_of(&self, entity: EntityRef) -> Option<&BTreeMap<String, PropertyValue>> {
        match entity {
            EntityRef::Node(id) => self.nodes.get(&id).map(|n| &n.properties),
            EntityRef::Relationship(id) => self.relationships.get(&id).map(|r| &r.properties),
        }
    }

    /// Returns a committed property value.
    #[must_use]
    pub fn get_property(&self, entity: EntityRef, key: &str) -> Option<&PropertyValue> {
        self.properties_of(entity).and_then(|props| props.get(key))
    }

    /// Checks that applying `data` leaves no relationship without an endpoint.
    ///
    /// `pending` holds the records of relationships created by the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConstraintViolation`] naming the first offending
    /// node.
    pub fn validate(
        &self,
        data: &TransactionData,
        pending: &HashMap<RelationshipId, RelationshipRecord>,
    ) -> CoreResult<()> {
        let node_survives = |id: NodeId| {
            data.is_created_node(id) || (self.contains_node(id) && !data.is_deleted_node(id))
        };

        for &node in data.deleted_nodes() {
            let attached = self
                .relationships
                .iter()
                .find(|(id, rel)| rel.touches(node) && !data.is_deleted_relationship(**id));
            if let Some((rel, _)) = attached {
                return Err(CoreError::constraint_violation(format!(
                    "{node} deleted while {rel} still references it"
                )));
            }
        }

        for &rel in data.created_relationships() {
            if let Some(record) = pending.get(&rel) {
                for endpoint in [record.start, record.end] {
                    if !node_survives(endpoint) {
                        return Err(CoreError::constraint_violation(format!(
                            "{endpoint} deleted while {rel} still references it"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validates and writes a transaction's net changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConstraintViolation`] if validation fails; the
    /// store is untouched in that case.
    pub fn commit(
        &mut self,
        data: &TransactionData,
        mut pending: HashMap<RelationshipId, RelationshipRecord>,
    ) -> CoreResult<()> {
        self.validate(data, &pending)?;

        for &id in data.created_nodes() {
            self.nodes.insert(id, NodeRecord::default());
        }
        for &id in data.created_relationships() {
            if let Some(record) = pending.remove(&id) {
                self.relationships.insert(id, record);
            }
        }
        for assignment in data.assigned_properties() {
            if let Some(props) = self.properties_mut(assignment.entity) {
                props.insert(assignment.key.clone(), assignment.value.clone());
            }
        }
        for removal in data.removed_properties() {
            if let Some(props) = self.properties_mut(removal.entity) {
                props.remove(&removal.key);
            }
        }
        for id in data.deleted_relationships() {
            self.relationships.remove(id);
        }
        for id in data.deleted_nodes() {
            self.nodes.remove(id);
        }
        Ok(())
    }

    fn properties_mut(&mut self, entity: EntityRef) -> Option<&mut BTreeMap<String, PropertyValue>> {
        match entity {
            EntityRef::Node(id) => self.nodes.get_mut(&id).map(|n| &mut n.properties),
            EntityRef::Relationship(id) => {
                self.relationships.get_mut(&id).map(|r| &mut r.properties)
            }
        }
    }
}

impl CommittedState for GraphStore {
    fn property(&self, entity: EntityRef, key: &str) -> Option<PropertyValue> {
        self.get_property(entity, key).cloned()
    }

    fn properties(&self, entity: EntityRef) -> Vec<(String, PropertyValue)> {
        self.properties_of(entity)
            .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeTracker;
    use crate::types::TransactionId;

    fn n(id: u64) -> NodeId {
        NodeId::new(id)
    }

    /// Commits two nodes joined by one relationship with a property each.
    fn seeded() -> GraphStore {
        let mut store = GraphStore::new();
        let mut tracker = ChangeTracker::new();
        tracker.record_node_created(n(1));
        tracker.record_node_created(n(2));
        tracker.record_relationship_created(RelationshipId::new(1));
        tracker.record_property_set(&store, n(1).into(), "name", "a".into());
        tracker.record_property_set(&store, RelationshipId::new(1).into(), "w", 4.5.into());

        let mut pending = HashMap::new();
        pending.insert(RelationshipId::new(1), RelationshipRecord::new(n(1), n(2), "KNOWS"));
        store
            .commit(&tracker.snapshot(TransactionId::new(1)), pending)
            .unwrap();
        store
    }

    #[test]
    fn commit_applies_net_changes() {
        let store = seeded();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.relationship_count(), 1);
        assert_eq!(
            store.get_property(n(1).into(), "name"),
            Some(&PropertyValue::from("a"))
        );
        assert_eq!(
            store.relationship(RelationshipId::new(1)).map(|r| r.rel_type.as_str()),
            Some("KNOWS")
        );
    }

    #[test]
    fn committed_state_reads() {
        let store = seeded();
        assert_eq!(
            CommittedState::property(&store, n(1).into(), "name"),
            Some(PropertyValue::from("a"))
        );
        assert_eq!(CommittedState::properties(&store, n(2).into()), vec![]);
        assert_eq!(CommittedState::properties(&store, n(99).into()), vec![]);
    }

    #[test]
    fn deleting_attached_node_violates_constraint() {
        let mut store = seeded();
        let mut tracker = ChangeTracker::new();
        tracker.record_node_deleted(&store, n(2));

        let err = store
            .commit(&tracker.snapshot(TransactionId::new(2)), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert!(store.contains_node(n(2)));
    }

    #[test]
    fn deleting_relationship_then_node_succeeds() {
        let mut store = seeded();
        let mut tracker = ChangeTracker::new();
        tracker.record_relationship_deleted(&store, RelationshipId::new(1));
        tracker.record_node_deleted(&store, n(1));

        store
            .commit(&tracker.snapshot(TransactionId::new(2)), HashMap::new())
            .unwrap();
        assert!(!store.contains_node(n(1)));
        assert!(store.contains_node(n(2)));
        assert_eq!(store.relationship_count(), 0);
    }

    #[test]
    fn relationship_to_cancelled_node_violates_constraint() {
        let mut store = seeded();
        let mut tracker = ChangeTracker::new();
        tracker.record_node_created(n(3));
        tracker.record_relationship_created(RelationshipId::new(2));
        tracker.record_node_deleted(&store, n(3));

        let mut pending = HashMap::new();
        pending.insert(RelationshipId::new(2), RelationshipRecord::new(n(1), n(3), "KNOWS"));
        let err = store
            .commit(&tracker.snapshot(TransactionId::new(2)), pending)
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }

    #[test]
    fn removal_applies() {
        let mut store = seeded();
        let mut tracker = ChangeTracker::new();
        tracker.record_property_removed(&store, n(1).into(), "name");

        store
            .commit(&tracker.snapshot(TransactionId::new(2)), HashMap::new())
            .unwrap();
        assert_eq!(store.get_property(n(1).into(), "name"), None);
    }
}
