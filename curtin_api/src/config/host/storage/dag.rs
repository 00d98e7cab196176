//! Dependency graph over a [`StorageAction`] list (§4.5).
//!
//! A thin struct around a `petgraph::Graph`, built once from the flat
//! action list and then queried for ordering and validation.

use std::collections::HashMap;

use petgraph::{graph::NodeIndex, Directed, Graph};

use crate::error::ValidationError;

use super::StorageAction;

type ActionGraph = Graph<StorageAction, (), Directed>;

/// The storage configuration's dependency DAG: one node per action, one edge
/// per reference, pointing from dependency to dependent.
pub struct StorageDag {
    inner: ActionGraph,
}

impl StorageDag {
    /// Builds the graph from a flat action list, checking:
    /// - every id is unique (§3),
    /// - every reference resolves to a declared id,
    /// - every reference's type is allowed for the referencing action's type
    ///   (the composition invariants of §3),
    /// - the graph has no cycles.
    pub fn build(actions: &[StorageAction]) -> Result<Self, ValidationError> {
        let mut graph: ActionGraph = Graph::new();
        let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();

        for action in actions {
            if index_of.insert(action.id(), graph.add_node(action.clone())).is_some() {
                return Err(ValidationError::DuplicateId(action.id().to_string()));
            }
        }

        for action in actions {
            for reference in action.references() {
                let &dep_index = index_of.get(reference).ok_or_else(|| ValidationError::UnresolvedReference {
                    item: action.id().to_string(),
                    reference: reference.to_string(),
                })?;

                let dep_type = graph[dep_index].type_name();
                if !action.allowed_dependency_types().contains(&dep_type) {
                    return Err(ValidationError::DisallowedDependency {
                        item: action.id().to_string(),
                        item_type: action.type_name().to_string(),
                        reference: reference.to_string(),
                        reference_type: dep_type.to_string(),
                    });
                }

                let this_index = index_of[action.id()];
                graph.add_edge(dep_index, this_index, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(ValidationError::DependencyCycle);
        }

        Ok(StorageDag { inner: graph })
    }

    /// Returns the actions directly depended on by `id`, in declaration
    /// order. Used by clear-holders-style walks that need a device's
    /// immediate ancestry rather than the full linearization.
    pub fn dependencies_of(&self, id: &str) -> Vec<&StorageAction> {
        self.inner
            .node_indices()
            .find(|&i| self.inner[i].id() == id)
            .map(|i| {
                self.inner
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .map(|d| &self.inner[d])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Orders actions by dependency depth (number of hops from a root node),
    /// breaking ties by original input order, per §4.5 and testable
    /// property §8.1: applying actions in this order never references a
    /// device before it exists.
    pub fn linearize(&self) -> Vec<StorageAction> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let order = petgraph::algo::toposort(&self.inner, None)
            .expect("cycles are rejected by build()");

        for &node in &order {
            let d = self
                .inner
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .map(|dep| depth.get(&dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, d);
        }

        let mut indexed: Vec<(usize, usize, NodeIndex)> = self
            .inner
            .node_indices()
            .map(|n| (depth[&n], n.index(), n))
            .collect();
        indexed.sort_by_key(|&(d, original_index, _)| (d, original_index));

        indexed.into_iter().map(|(_, _, n)| self.inner[n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::host::storage::{DiskAction, Format, Mount, Partition, PartitionTableType};
    use crate::primitives::ByteCount;

    fn disk(id: &str) -> StorageAction {
        StorageAction::Disk(DiskAction {
            id: id.into(),
            serial: None,
            wwn: None,
            path: Some(format!("/dev/{id}").into()),
            multipath: None,
            ptable: Some(PartitionTableType::Gpt),
            wipe: None,
            preserve: false,
            name: None,
            grub_device: false,
        })
    }

    fn partition(id: &str, device: &str) -> StorageAction {
        StorageAction::Partition(Partition {
            id: id.into(),
            device: device.into(),
            number: 1,
            size: ByteCount(1024 * 1024 * 1024),
            offset: None,
            flag: None,
            uuid: None,
            preserve: false,
            wipe: None,
        })
    }

    fn format(id: &str, volume: &str) -> StorageAction {
        StorageAction::Format(Format {
            id: id.into(),
            volume: volume.into(),
            fstype: "ext4".into(),
            label: None,
            uuid: None,
            preserve: false,
        })
    }

    fn mount(id: &str, device: &str, path: &str) -> StorageAction {
        StorageAction::Mount(Mount {
            id: id.into(),
            device: Some(device.into()),
            spec: None,
            path: path.into(),
            fstype: None,
            options: None,
        })
    }

    #[test]
    fn test_linearize_orders_by_depth() {
        // declared out of dependency order on purpose
        let actions = vec![
            mount("m1", "fmt1", "/"),
            format("fmt1", "p1"),
            partition("p1", "sda"),
            disk("sda"),
        ];
        let dag = StorageDag::build(&actions).unwrap();
        let order: Vec<&str> = dag.linearize().iter().map(|a| a.id()).collect();
        assert_eq!(order, vec!["sda", "p1", "fmt1", "m1"]);
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let actions = vec![partition("p1", "missing-disk")];
        let err = StorageDag::build(&actions).unwrap_err();
        assert!(matches!(err, ValidationError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let actions = vec![disk("sda"), disk("sda")];
        let err = StorageDag::build(&actions).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateId(_)));
    }

    #[test]
    fn test_disallowed_dependency_type_is_rejected() {
        // a mount cannot reference a disk directly, only a format
        let actions = vec![disk("sda"), mount("m1", "sda", "/")];
        let err = StorageDag::build(&actions).unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedDependency { .. }));
    }

    #[test]
    fn test_ties_broken_by_input_order() {
        // two independent disks: no dependency between them, so depth ties;
        // order must follow declaration order.
        let actions = vec![disk("sdb"), disk("sda")];
        let dag = StorageDag::build(&actions).unwrap();
        let order: Vec<&str> = dag.linearize().iter().map(|a| a.id()).collect();
        assert_eq!(order, vec!["sdb", "sda"]);
    }
}
