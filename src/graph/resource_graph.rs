//! ResourceGraph - dependency edges between declared resources
//!
//! Built incrementally as resources are declared: a node's dependencies are
//! the origins of its input values. Uses Arc<str> + FxHashMap + SmallVec
//! the same way for every node.
//!
//! Validation:
//! - Cycle detection using DFS three-color algorithm
//! - Topological order (Kahn, declaration order as tie-break)

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::GraphError;

/// Stack-allocated deps: most resources have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// One declared node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub name: Arc<str>,
    pub kind: Arc<str>,
}

/// Graph of resource dependencies
#[derive(Debug, Default)]
pub struct ResourceGraph {
    /// resource -> resources consuming its outputs
    adjacency: FxHashMap<Arc<str>, DepVec>,
    /// resource -> resources it consumes outputs from
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// Nodes in declaration order
    nodes: Vec<GraphNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declared resource and its dependencies
    ///
    /// Dependencies must already be declared, so a graph built only through
    /// this method is acyclic by construction.
    pub fn add_node<'a>(
        &mut self,
        name: &str,
        kind: &str,
        dependencies: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), GraphError> {
        if self.contains(name) {
            return Err(GraphError::DuplicateResource {
                resource: name.to_string(),
            });
        }

        let mut deps = DepVec::new();
        for dep in dependencies {
            let Some(existing) = self.nodes.iter().find(|n| n.name.as_ref() == dep) else {
                return Err(GraphError::UnknownDependency {
                    resource: name.to_string(),
                    dependency: dep.to_string(),
                });
            };
            if !deps.contains(&existing.name) {
                deps.push(Arc::clone(&existing.name));
            }
        }

        let id: Arc<str> = Arc::from(name);
        for dep in &deps {
            self.adjacency
                .entry(Arc::clone(dep))
                .or_default()
                .push(Arc::clone(&id));
        }
        self.adjacency.entry(Arc::clone(&id)).or_default();
        self.predecessors.insert(Arc::clone(&id), deps);
        self.nodes.push(GraphNode {
            name: id,
            kind: Arc::from(kind),
        });
        Ok(())
    }

    /// Build a graph from raw edges (`from` feeds `to`), without ordering checks
    pub fn from_edges(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> Self {
        let mut graph = Self::new();
        for (name, kind) in nodes {
            let id: Arc<str> = Arc::from(*name);
            graph.adjacency.insert(Arc::clone(&id), DepVec::new());
            graph.predecessors.insert(Arc::clone(&id), DepVec::new());
            graph.nodes.push(GraphNode {
                name: id,
                kind: Arc::from(*kind),
            });
        }
        for (from, to) in edges {
            let from: Arc<str> = Arc::from(*from);
            let to: Arc<str> = Arc::from(*to);
            graph
                .adjacency
                .entry(Arc::clone(&from))
                .or_default()
                .push(Arc::clone(&to));
            graph.predecessors.entry(to).or_default().push(from);
        }
        graph
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.predecessors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn kind_of(&self, name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.name.as_ref() == name)
            .map(|n| n.kind.as_ref())
    }

    /// Direct dependencies of a resource
    #[inline]
    pub fn dependencies(&self, name: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(name)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Direct dependents of a resource
    #[inline]
    pub fn dependents(&self, name: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency.get(name).map_or(EMPTY, SmallVec::as_slice)
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.dependents(current) {
                if neighbor.as_ref() == to {
                    return true;
                }
                if visited.insert(neighbor.as_ref()) {
                    queue.push_back(neighbor.as_ref());
                }
            }
        }
        false
    }

    /// Detect cycles using DFS with three-color marking
    pub fn detect_cycles(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: Arc<str>,
            adjacency: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            let start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .nodes
            .iter()
            .map(|n| (Arc::clone(&n.name), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        for node in &self.nodes {
            if colors.get(&node.name) == Some(&Color::White) {
                dfs(Arc::clone(&node.name), &self.adjacency, &mut colors, &mut stack)
                    .map_err(|cycle| GraphError::CycleDetected { cycle })?;
            }
        }
        Ok(())
    }

    /// Resources in an order where every dependency precedes its dependents
    pub fn topological_order(&self) -> Result<Vec<Arc<str>>, GraphError> {
        self.detect_cycles()?;

        let mut indegree: FxHashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.name.as_ref(), self.dependencies(&n.name).len()))
            .collect();
        let mut ready: VecDeque<&Arc<str>> = self
            .nodes
            .iter()
            .filter(|n| indegree.get(n.name.as_ref()) == Some(&0))
            .map(|n| &n.name)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(name) = ready.pop_front() {
            order.push(Arc::clone(name));
            // declaration order among newly ready nodes
            for node in &self.nodes {
                if !self.dependencies(&node.name).contains(name) {
                    continue;
                }
                if let Some(count) = indegree.get_mut(node.name.as_ref()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(&node.name);
                    }
                }
            }
        }
        Ok(order)
    }

    /// Validate the graph is acyclic
    pub fn validate(&self) -> Result<(), GraphError> {
        self.detect_cycles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_chain() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        graph.add_node("vault-keys", "kms.KeyRing", []).unwrap();
        graph
            .add_node("vault-key", "kms.CryptoKey", ["vault-keys"])
            .unwrap();
        graph.add_node("vault-storage", "storage.Bucket", []).unwrap();
        graph
            .add_node("vault", "cloudrun.Service", ["vault-key", "vault-storage", "vault-keys"])
            .unwrap();
        graph
    }

    #[test]
    fn dependencies_and_dependents() {
        let graph = vault_chain();
        let deps: Vec<&str> = graph.dependencies("vault").iter().map(|d| d.as_ref()).collect();
        assert_eq!(deps, vec!["vault-key", "vault-storage", "vault-keys"]);

        let dependents: Vec<&str> =
            graph.dependents("vault-keys").iter().map(|d| d.as_ref()).collect();
        assert_eq!(dependents, vec!["vault-key", "vault"]);
        assert_eq!(graph.kind_of("vault-storage"), Some("storage.Bucket"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = vault_chain();
        let err = graph.add_node("vault", "cloudrun.Service", []).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateResource { .. }));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph.add_node("vault", "cloudrun.Service", ["ghost"]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownDependency { dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn has_path_is_transitive() {
        let graph = vault_chain();
        assert!(graph.has_path("vault-keys", "vault"));
        assert!(!graph.has_path("vault", "vault-keys"));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let graph = vault_chain();
        let order: Vec<String> = graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("vault-keys") < pos("vault-key"));
        assert!(pos("vault-key") < pos("vault"));
        assert!(pos("vault-storage") < pos("vault"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn detect_cycle_in_raw_edges() {
        let graph = ResourceGraph::from_edges(
            &[("a", "x"), ("b", "x"), ("c", "x")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        let err = graph.validate().unwrap_err();
        match err {
            GraphError::CycleDetected { cycle } => assert!(cycle.contains("a → b → c → a")),
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(graph.topological_order().is_err());
    }
}
