use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;

use crate::model::costs::{Assignment, CostTable};

/// Canonical identifier of a graph pair: always `(g1, g2)` with `g1 < g2`.
pub type PairId = (usize, usize);

pub fn canonical_pair(g1: usize, g2: usize) -> PairId {
    if g1 < g2 {
        (g1, g2)
    } else {
        (g2, g1)
    }
}

/// A graph is identified by its position in the model and carries nothing but
/// its node count; all structure lives in the pairwise cost tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Graph {
    pub id: usize,
    pub node_count: usize,
}

impl Graph {
    pub fn new(id: usize, node_count: usize) -> Self {
        Self { id, node_count }
    }
}

/// Cost model for one ordered graph pair.
///
/// Besides the sparse cost table, the candidate lists per node (both
/// directions) are kept in sync with the assignments; the assignment solvers
/// iterate those instead of scanning the table.
#[derive(Debug, Clone)]
pub struct GmModel {
    pub graph1: Graph,
    pub graph2: Graph,
    pub costs: CostTable,
    pub assignment_list: Vec<Assignment>,
    pub candidates_left: Vec<Vec<usize>>,
    pub candidates_right: Vec<Vec<usize>>,
}

impl GmModel {
    pub fn new(graph1: Graph, graph2: Graph) -> Self {
        Self::with_capacity(graph1, graph2, 0, 0)
    }

    pub fn with_capacity(
        graph1: Graph,
        graph2: Graph,
        no_assignments: usize,
        no_edges: usize,
    ) -> Self {
        Self {
            graph1,
            graph2,
            costs: CostTable::with_capacity(no_assignments, no_edges),
            assignment_list: Vec::with_capacity(no_assignments),
            candidates_left: vec![Vec::new(); graph1.node_count],
            candidates_right: vec![Vec::new(); graph2.node_count],
        }
    }

    /// Registers a candidate match. Out-of-range nodes are rejected here so
    /// the solvers never see a malformed table.
    pub fn add_assignment(&mut self, node1: usize, node2: usize, cost: f64) -> Result<()> {
        if node1 >= self.graph1.node_count {
            bail!(
                "assignment node {} out of range for graph {} with {} nodes",
                node1,
                self.graph1.id,
                self.graph1.node_count
            );
        }
        if node2 >= self.graph2.node_count {
            bail!(
                "assignment node {} out of range for graph {} with {} nodes",
                node2,
                self.graph2.id,
                self.graph2.node_count
            );
        }
        if self.costs.contains_unary((node1, node2)) {
            bail!("duplicate assignment ({node1}, {node2})");
        }
        self.costs.set_unary((node1, node2), cost);
        self.assignment_list.push((node1, node2));
        self.candidates_left[node1].push(node2);
        self.candidates_right[node2].push(node1);
        Ok(())
    }

    /// Adds a pairwise cost between two previously registered assignments.
    pub fn add_edge(&mut self, a: Assignment, b: Assignment, cost: f64) -> Result<()> {
        if !self.costs.contains_unary(a) || !self.costs.contains_unary(b) {
            bail!("edge ({a:?}, {b:?}) references an unregistered assignment");
        }
        self.costs.set_pairwise(a, b, cost);
        Ok(())
    }

    /// Variant taking indices into the assignment list (model file format).
    pub fn add_edge_by_index(&mut self, a_idx: usize, b_idx: usize, cost: f64) -> Result<()> {
        let a = *self
            .assignment_list
            .get(a_idx)
            .ok_or_else(|| anyhow!("edge references unknown assignment index {a_idx}"))?;
        let b = *self
            .assignment_list
            .get(b_idx)
            .ok_or_else(|| anyhow!("edge references unknown assignment index {b_idx}"))?;
        self.add_edge(a, b, cost)
    }

    pub fn assignment_count(&self) -> usize {
        self.assignment_list.len()
    }

    pub fn edge_count(&self) -> usize {
        self.costs.pairwise_count()
    }
}

/// The full multi-graph matching problem: graphs plus one pairwise cost model
/// per (canonical) graph pair. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct MgmModel {
    pub graphs: Vec<Graph>,
    pub models: IndexMap<PairId, GmModel>,
}

impl MgmModel {
    pub fn new(graphs: Vec<Graph>) -> Result<Self> {
        for (idx, graph) in graphs.iter().enumerate() {
            if graph.id != idx {
                bail!("graph id {} does not match its position {}", graph.id, idx);
            }
        }
        Ok(Self {
            graphs,
            models: IndexMap::new(),
        })
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    /// Inserts a pairwise model, enforcing the canonical-pair invariant and
    /// that the declared node counts line up with the graphs.
    pub fn add_model(&mut self, model: GmModel) -> Result<()> {
        let (g1, g2) = (model.graph1.id, model.graph2.id);
        if g1 >= g2 {
            bail!("pairwise model ({g1}, {g2}) violates the g1 < g2 invariant");
        }
        if g2 >= self.graphs.len() {
            bail!("pairwise model references unknown graph {g2}");
        }
        if self.graphs[g1].node_count != model.graph1.node_count
            || self.graphs[g2].node_count != model.graph2.node_count
        {
            bail!("pairwise model ({g1}, {g2}) disagrees with declared node counts");
        }
        if self.models.contains_key(&(g1, g2)) {
            bail!("duplicate pairwise model for pair ({g1}, {g2})");
        }
        self.models.insert((g1, g2), model);
        Ok(())
    }

    pub fn model_for(&self, pair: PairId) -> Option<&GmModel> {
        self.models.get(&pair)
    }

    /// All pairs the model defines, in ascending order.
    pub fn canonical_pairs(&self) -> Vec<PairId> {
        let mut pairs: Vec<PairId> = self.models.keys().copied().collect();
        pairs.sort_unstable();
        pairs
    }

    /// Unary cost between two nodes of arbitrary (distinct) graphs, resolved
    /// through the canonical pair model. `None` means forbidden or no model.
    pub fn unary_between(
        &self,
        g1: usize,
        node1: usize,
        g2: usize,
        node2: usize,
    ) -> Option<f64> {
        let pair = canonical_pair(g1, g2);
        let model = self.models.get(&pair)?;
        if g1 < g2 {
            model.costs.unary((node1, node2))
        } else {
            model.costs.unary((node2, node1))
        }
    }
}
