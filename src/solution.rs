use anyhow::{bail, Result};
use indexmap::IndexMap;

use crate::cliques::CliqueTable;
use crate::model::costs::{Assignment, INFINITY_COST};
use crate::model::multigraph::{GmModel, MgmModel, PairId};

/// Per-pair labeling: for each node of the first graph, the matched node of
/// the second graph, or `None` for unmatched.
pub type Labeling = Vec<Option<usize>>;

/// Realized energy of a labeling under a pairwise model. Active assignments
/// absent from the cost table render the labeling infeasible.
pub fn pair_energy(model: &GmModel, labeling: &Labeling) -> f64 {
    let mut energy = 0.0;
    for (node, label) in labeling.iter().enumerate() {
        if let Some(label) = label {
            match model.costs.unary((node, *label)) {
                Some(cost) => energy += cost,
                None => return INFINITY_COST,
            }
        }
    }
    for ((a, b), cost) in model.costs.iter_pairwise() {
        if is_active(labeling, a) && is_active(labeling, b) {
            energy += cost;
        }
    }
    energy
}

fn is_active(labeling: &Labeling, assignment: Assignment) -> bool {
    labeling[assignment.0] == Some(assignment.1)
}

/// Solution of a single pairwise problem with its realized total cost.
#[derive(Debug, Clone, PartialEq)]
pub struct GmSolution {
    pub labeling: Labeling,
    pub energy: f64,
}

impl GmSolution {
    pub fn from_labeling(model: &GmModel, labeling: Labeling) -> Self {
        let energy = pair_energy(model, &labeling);
        Self { labeling, energy }
    }

    pub fn is_active(&self, assignment: Assignment) -> bool {
        is_active(&self.labeling, assignment)
    }

    /// Checks the labeling invariants: labels in range and injective targets.
    pub fn validate(&self, model: &GmModel) -> Result<()> {
        validate_labeling(&self.labeling, model.graph1.node_count, model.graph2.node_count)
    }
}

pub fn validate_labeling(labeling: &Labeling, n1: usize, n2: usize) -> Result<()> {
    if labeling.len() != n1 {
        bail!("labeling length {} does not match node count {}", labeling.len(), n1);
    }
    let mut taken = vec![false; n2];
    for (node, label) in labeling.iter().enumerate() {
        if let Some(label) = label {
            if *label >= n2 {
                bail!("node {} labeled {} outside target range {}", node, label, n2);
            }
            if taken[*label] {
                bail!("target node {} matched more than once", label);
            }
            taken[*label] = true;
        }
    }
    Ok(())
}

/// A full multi-graph solution: one labeling per canonical pair of the owning
/// model. Derived snapshots, recomputed on request, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct MgmSolution {
    pub labelings: IndexMap<PairId, Labeling>,
}

impl MgmSolution {
    pub fn empty(model: &MgmModel) -> Self {
        let mut labelings = IndexMap::with_capacity(model.models.len());
        for pair in model.canonical_pairs() {
            let n1 = model.graphs[pair.0].node_count;
            labelings.insert(pair, vec![None; n1]);
        }
        Self { labelings }
    }

    /// Derives the per-pair labelings from clique co-membership.
    pub fn build_from(model: &MgmModel, cliques: &CliqueTable) -> Self {
        let mut solution = Self::empty(model);
        for clique in cliques.iter() {
            for (&g1, &n1) in clique.iter() {
                for (&g2, &n2) in clique.iter() {
                    if g1 >= g2 {
                        continue;
                    }
                    if let Some(labeling) = solution.labelings.get_mut(&(g1, g2)) {
                        labeling[n1] = Some(n2);
                    }
                }
            }
        }
        solution
    }

    pub fn evaluate(&self, model: &MgmModel) -> f64 {
        let mut energy = 0.0;
        for (pair, labeling) in &self.labelings {
            if let Some(gm) = model.model_for(*pair) {
                energy += pair_energy(gm, labeling);
            }
        }
        energy
    }

    pub fn validate(&self, model: &MgmModel) -> Result<()> {
        for (pair, labeling) in &self.labelings {
            if model.model_for(*pair).is_none() {
                bail!("labeling for pair {:?} has no model", pair);
            }
            let n1 = model.graphs[pair.0].node_count;
            let n2 = model.graphs[pair.1].node_count;
            validate_labeling(labeling, n1, n2)?;
        }
        Ok(())
    }

    /// Cycle consistency: composing i→j with j→k agrees with i→k wherever all
    /// three labels are defined.
    pub fn is_cycle_consistent(&self, model: &MgmModel) -> bool {
        let no_graphs = model.graph_count();
        for i in 0..no_graphs {
            for j in (i + 1)..no_graphs {
                for k in (j + 1)..no_graphs {
                    let (Some(l_ij), Some(l_jk), Some(l_ik)) = (
                        self.labelings.get(&(i, j)),
                        self.labelings.get(&(j, k)),
                        self.labelings.get(&(i, k)),
                    ) else {
                        continue;
                    };
                    for (a, b) in l_ij.iter().enumerate() {
                        let Some(b) = b else { continue };
                        let Some(c) = l_jk[*b] else { continue };
                        let Some(c_direct) = l_ik[a] else { continue };
                        if c != c_direct {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }
}
