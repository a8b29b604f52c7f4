//! リソースグラフ
//!
//! 明示的な `depends-on` と `${...}` 参照を宣言リソース間の辺に解決し、
//! 適用できないグラフを拒否する:
//! アドレスの重複、存在しない参照、
//! 無効化されたリソースへの参照、循環。

use crate::error::GraphError;
use crate::model::{Address, Declaration, ResourceSpec};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// グラフ上の宣言リソース
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub spec: ResourceSpec,

    /// 解決済みの直接依存（明示・推論の両方）
    pub dependencies: BTreeSet<Address>,
}

impl ResourceNode {
    pub fn address(&self) -> &Address {
        &self.spec.address
    }

    pub fn enabled(&self) -> bool {
        self.spec.enabled
    }
}

/// 宣言リソースの非循環グラフ
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: BTreeMap<Address, ResourceNode>,
    dependents: BTreeMap<Address, BTreeSet<Address>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

impl ResourceGraph {
    /// 宣言のリソースからグラフを構築
    pub fn from_declaration(declaration: &Declaration) -> Result<Self, GraphError> {
        Self::build(declaration.resources.iter().cloned())
    }

    pub fn build(specs: impl IntoIterator<Item = ResourceSpec>) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();

        for spec in specs {
            if nodes.contains_key(&spec.address) {
                return Err(GraphError::DuplicateAddress(spec.address));
            }
            let dependencies = spec.dependencies();
            nodes.insert(
                spec.address.clone(),
                ResourceNode { spec, dependencies },
            );
        }

        let mut dependents: BTreeMap<Address, BTreeSet<Address>> = nodes
            .keys()
            .map(|addr| (addr.clone(), BTreeSet::new()))
            .collect();

        for node in nodes.values() {
            for dep in &node.dependencies {
                let Some(target) = nodes.get(dep) else {
                    return Err(GraphError::UnresolvedReference {
                        from: node.address().clone(),
                        to: dep.clone(),
                    });
                };
                if node.enabled() && !target.enabled() {
                    return Err(GraphError::DisabledReference {
                        from: node.address().clone(),
                        to: dep.clone(),
                    });
                }
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(node.address().clone());
                }
            }
        }

        let graph = Self { nodes, dependents };
        graph.check_acyclic()?;

        debug!(nodes = graph.nodes.len(), "Resource graph built");
        Ok(graph)
    }

    /// 深さ優先探索。現在の経路上のノードをグレーでマークする
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks: BTreeMap<&Address, Mark> =
            self.nodes.keys().map(|a| (a, Mark::White)).collect();

        for start in self.nodes.keys() {
            if marks.get(start) != Some(&Mark::White) {
                continue;
            }

            // (ノード, 未訪問の依存先)
            let mut stack: Vec<(&Address, Vec<&Address>)> = Vec::new();
            marks.insert(start, Mark::Grey);
            stack.push((start, self.direct_dependencies(start)));

            while let Some((current, pending)) = stack.last_mut() {
                let current = *current;
                match pending.pop() {
                    Some(next) => match marks.get(next).copied().unwrap_or(Mark::White) {
                        Mark::White => {
                            marks.insert(next, Mark::Grey);
                            stack.push((next, self.direct_dependencies(next)));
                        }
                        Mark::Grey => {
                            let position = stack
                                .iter()
                                .position(|(addr, _)| *addr == next)
                                .unwrap_or(0);
                            let cycle = stack[position..]
                                .iter()
                                .map(|(addr, _)| (*addr).clone())
                                .collect();
                            return Err(GraphError::Cycle(cycle));
                        }
                        Mark::Black => {}
                    },
                    None => {
                        marks.insert(current, Mark::Black);
                        stack.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// pop でアドレス順に訪問できるよう逆順で返す
    fn direct_dependencies(&self, address: &Address) -> Vec<&Address> {
        self.nodes
            .get(address)
            .map(|n| n.dependencies.iter().rev().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, address: &Address) -> Option<&ResourceNode> {
        self.nodes.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    /// アドレス順のノード
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `address` が直接依存するリソース
    pub fn dependencies(&self, address: &Address) -> impl Iterator<Item = &Address> {
        self.nodes
            .get(address)
            .into_iter()
            .flat_map(|n| n.dependencies.iter())
    }

    /// `address` に直接依存するリソース
    pub fn dependents(&self, address: &Address) -> impl Iterator<Item = &Address> {
        self.dependents.get(address).into_iter().flatten()
    }

    /// `address` に直接・間接に依存する全リソース
    pub fn transitive_dependents(&self, address: &Address) -> BTreeSet<Address> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&Address> = self.dependents(address).collect();

        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }

        seen
    }

    /// 依存先を先に並べる。同順位はアドレス順
    pub fn topological_order(&self) -> Vec<Address> {
        let mut in_degree: BTreeMap<&Address, usize> = self
            .nodes
            .iter()
            .map(|(addr, node)| (addr, node.dependencies.len()))
            .collect();

        let mut ready: BTreeSet<&Address> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(addr, _)| *addr)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.clone());
            for dependent in self.dependents(next) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        order
    }
}
