use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::model::multigraph::MgmModel;
use crate::solution::MgmSolution;

/// One correspondence class: at most one node per graph, keyed by graph id.
/// `BTreeMap` keeps member iteration sorted, which downstream tie-breaking
/// relies on.
pub type Clique = BTreeMap<usize, usize>;

/// The clique partition as plain data: the hand-off currency between the
/// generator, the local searchers and the swap optimizer.
#[derive(Debug, Clone, Default)]
pub struct CliqueTable {
    pub no_graphs: usize,
    cliques: Vec<Clique>,
}

impl CliqueTable {
    pub fn new(no_graphs: usize) -> Self {
        Self {
            no_graphs,
            cliques: Vec::new(),
        }
    }

    pub fn clique_count(&self) -> usize {
        self.cliques.len()
    }

    pub fn add_clique(&mut self, clique: Clique) -> usize {
        self.cliques.push(clique);
        self.cliques.len() - 1
    }

    pub fn get(&self, idx: usize) -> &Clique {
        &self.cliques[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Clique {
        &mut self.cliques[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clique> {
        self.cliques.iter()
    }

    /// Drops empty cliques. Indices shift; callers owning a reverse index must
    /// rebuild it afterwards.
    pub fn prune(&mut self) {
        self.cliques.retain(|c| !c.is_empty());
    }

    pub fn export_solution(&self, model: &MgmModel) -> MgmSolution {
        MgmSolution::build_from(model, self)
    }
}

/// Clique partition plus the reverse index `[graph][node] -> clique`.
///
/// Exactly one component holds a manager (and with it write access to the
/// partition) at a time; hand-off happens by exporting the table and
/// reconstructing on the other side.
#[derive(Debug, Clone)]
pub struct CliqueManager {
    node_counts: Vec<usize>,
    table: CliqueTable,
    index: Vec<Vec<usize>>,
}

impl CliqueManager {
    /// One singleton clique per (graph, node): the construction start state.
    pub fn singletons(model: &MgmModel) -> Self {
        let node_counts: Vec<usize> = model.graphs.iter().map(|g| g.node_count).collect();
        let mut table = CliqueTable::new(node_counts.len());
        let mut index: Vec<Vec<usize>> = node_counts.iter().map(|&n| vec![0; n]).collect();
        for (graph_id, &count) in node_counts.iter().enumerate() {
            for node in 0..count {
                let mut clique = Clique::new();
                clique.insert(graph_id, node);
                index[graph_id][node] = table.add_clique(clique);
            }
        }
        Self {
            node_counts,
            table,
            index,
        }
    }

    /// Rebuilds a manager from an externally supplied table, validating that
    /// the cliques partition every node of every graph exactly once.
    pub fn reconstruct_from(model: &MgmModel, table: CliqueTable) -> Result<Self> {
        let node_counts: Vec<usize> = model.graphs.iter().map(|g| g.node_count).collect();
        if table.no_graphs != node_counts.len() {
            bail!(
                "clique table spans {} graphs, model has {}",
                table.no_graphs,
                node_counts.len()
            );
        }
        let mut index: Vec<Vec<usize>> = node_counts
            .iter()
            .map(|&n| vec![usize::MAX; n])
            .collect();
        for (clique_idx, clique) in table.iter().enumerate() {
            for (&graph_id, &node) in clique.iter() {
                if graph_id >= node_counts.len() || node >= node_counts[graph_id] {
                    bail!("clique member ({graph_id}, {node}) outside the model");
                }
                if index[graph_id][node] != usize::MAX {
                    bail!("node ({graph_id}, {node}) appears in more than one clique");
                }
                index[graph_id][node] = clique_idx;
            }
        }
        for (graph_id, nodes) in index.iter().enumerate() {
            if let Some(node) = nodes.iter().position(|&c| c == usize::MAX) {
                bail!("node ({graph_id}, {node}) is missing from the clique table");
            }
        }
        Ok(Self {
            node_counts,
            table,
            index,
        })
    }

    pub fn table(&self) -> &CliqueTable {
        &self.table
    }

    pub fn export_table(self) -> CliqueTable {
        self.table
    }

    pub fn clique_of(&self, graph_id: usize, node: usize) -> usize {
        self.index[graph_id][node]
    }

    pub fn clique(&self, idx: usize) -> &Clique {
        self.table.get(idx)
    }

    pub fn clique_count(&self) -> usize {
        self.table.clique_count()
    }

    /// Merges clique `source` into clique `target`, leaving `source` empty
    /// until the next prune. Refused (returns false) if the cliques share a
    /// graph; callers mask such options beforehand, so a refusal means a move
    /// gets dropped, never a corrupted partition.
    pub fn merge(&mut self, target: usize, source: usize) -> bool {
        if target == source {
            return false;
        }
        let (a, b) = (self.table.get(target), self.table.get(source));
        if a.keys().any(|g| b.contains_key(g)) {
            return false;
        }
        let members: Vec<(usize, usize)> =
            self.table.get(source).iter().map(|(&g, &n)| (g, n)).collect();
        self.table.get_mut(source).clear();
        for (graph_id, node) in members {
            self.table.get_mut(target).insert(graph_id, node);
            self.index[graph_id][node] = target;
        }
        true
    }

    /// Detaches one node into a fresh singleton clique; returns its index.
    pub fn detach(&mut self, graph_id: usize, node: usize) -> usize {
        let old = self.index[graph_id][node];
        self.table.get_mut(old).remove(&graph_id);
        let mut clique = Clique::new();
        clique.insert(graph_id, node);
        let idx = self.table.add_clique(clique);
        self.index[graph_id][node] = idx;
        idx
    }

    /// Drops empty cliques and rebuilds the reverse index.
    pub fn prune(&mut self) {
        self.table.prune();
        for nodes in &mut self.index {
            nodes.fill(usize::MAX);
        }
        for (clique_idx, clique) in self.table.iter().enumerate() {
            for (&graph_id, &node) in clique.iter() {
                self.index[graph_id][node] = clique_idx;
            }
        }
    }

    pub fn export_solution(&self, model: &MgmModel) -> MgmSolution {
        MgmSolution::build_from(model, &self.table)
    }
}
