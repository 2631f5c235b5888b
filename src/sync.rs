use anyhow::{bail, Result};
use log::info;

use crate::model::multigraph::{GmModel, MgmModel};
use crate::solution::{Labeling, MgmSolution};

/// Derives a synchronization model from a (possibly cycle-inconsistent)
/// solution: every candidate match costs zero, matches the solution actually
/// uses cost -1, and no model carries edges. Re-solving the result pulls the
/// labelings towards mutual agreement, since a cycle-consistent subset of the
/// rewarded matches is what the clique partition can express.
///
/// With `feasible` set, only the original model's candidate matches are kept,
/// so the re-solved result never invents a match absent from the input data;
/// nodes without any legal match simply stay unmatched, and a labeled match
/// outside the candidate set earns no reward. Without it, every node pair
/// becomes a candidate.
pub fn build_sync_model(model: &MgmModel, solution: &MgmSolution, feasible: bool) -> Result<MgmModel> {
    info!(
        "Building synchronization problem ({} pairs, feasible: {feasible})",
        model.models.len()
    );
    let mut sync_model = MgmModel::new(model.graphs.clone())?;
    for (pair, gm) in &model.models {
        let Some(labeling) = solution.labelings.get(pair) else {
            bail!("solution carries no labeling for pair {:?}", pair);
        };
        let sync_gm = if feasible {
            feasible_sync_model(gm, labeling)?
        } else {
            infeasible_sync_model(gm, labeling)?
        };
        sync_model.add_model(sync_gm)?;
    }
    Ok(sync_model)
}

fn feasible_sync_model(model: &GmModel, labeling: &Labeling) -> Result<GmModel> {
    let mut sync = GmModel::with_capacity(
        model.graph1,
        model.graph2,
        model.assignment_count(),
        0,
    );
    for &(node1, node2) in &model.assignment_list {
        sync.add_assignment(node1, node2, 0.0)?;
    }
    reward_labeled(&mut sync, labeling);
    Ok(sync)
}

fn infeasible_sync_model(model: &GmModel, labeling: &Labeling) -> Result<GmModel> {
    let n1 = model.graph1.node_count;
    let n2 = model.graph2.node_count;
    let mut sync = GmModel::with_capacity(model.graph1, model.graph2, n1 * n2, 0);
    for node1 in 0..n1 {
        for node2 in 0..n2 {
            sync.add_assignment(node1, node2, 0.0)?;
        }
    }
    reward_labeled(&mut sync, labeling);
    Ok(sync)
}

/// Rewards only matches that exist as candidates in `sync`. Setting the cost
/// of an unregistered assignment would silently widen the candidate set, which
/// the feasible path must never do.
fn reward_labeled(sync: &mut GmModel, labeling: &Labeling) {
    for (node, label) in labeling.iter().enumerate() {
        if let Some(label) = label {
            if sync.costs.unary((node, *label)).is_some() {
                sync.costs.set_unary((node, *label), -1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cliques::CliqueManager;
    use crate::model::multigraph::Graph;
    use crate::order::MatchingOrder;
    use crate::solvers::{GmLocalSearcher, SequentialGenerator};
    use indexmap::IndexMap;

    fn triangle_model() -> MgmModel {
        let graphs = (0..3).map(|id| Graph::new(id, 2)).collect();
        let mut model = MgmModel::new(graphs).unwrap();
        for (g1, g2) in [(0, 1), (0, 2), (1, 2)] {
            let mut gm = GmModel::new(Graph::new(g1, 2), Graph::new(g2, 2));
            for n1 in 0..2 {
                for n2 in 0..2 {
                    gm.add_assignment(n1, n2, -1.0).unwrap();
                }
            }
            model.add_model(gm).unwrap();
        }
        model
    }

    /// A labeling that disagrees around the 3-cycle: 0->1 and 1->2 are
    /// identity, 0->2 is crossed.
    fn inconsistent_solution(model: &MgmModel) -> MgmSolution {
        let mut labelings = IndexMap::new();
        labelings.insert((0, 1), vec![Some(0), Some(1)]);
        labelings.insert((1, 2), vec![Some(0), Some(1)]);
        labelings.insert((0, 2), vec![Some(1), Some(0)]);
        let solution = MgmSolution { labelings };
        assert!(!solution.is_cycle_consistent(model));
        solution
    }

    #[test]
    fn resolving_the_sync_model_restores_consistency() -> Result<()> {
        let model = triangle_model();
        let broken = inconsistent_solution(&model);

        let sync_model = build_sync_model(&model, &broken, true)?;
        let order = MatchingOrder::sequential(&sync_model);
        let manager = SequentialGenerator::new(&sync_model).generate(&order)?;
        let searcher = GmLocalSearcher::new(&sync_model, &order);
        let (table, _) = searcher.search(manager.export_table())?;

        let synced = CliqueManager::reconstruct_from(&sync_model, table)?
            .export_solution(&sync_model);
        assert!(synced.is_cycle_consistent(&model));
        Ok(())
    }

    #[test]
    fn feasible_sync_keeps_the_sparsity_pattern() -> Result<()> {
        let graphs = (0..2).map(|id| Graph::new(id, 2)).collect();
        let mut model = MgmModel::new(graphs).unwrap();
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -1.0).unwrap();
        model.add_model(gm).unwrap();

        let mut labelings = IndexMap::new();
        labelings.insert((0, 1), vec![Some(0), None]);
        let solution = MgmSolution { labelings };

        let sync_model = build_sync_model(&model, &solution, true)?;
        let gm = sync_model.model_for((0, 1)).unwrap();
        assert_eq!(gm.assignment_count(), 1);
        assert_eq!(gm.costs.unary((0, 0)), Some(-1.0));

        let unrestricted = build_sync_model(&model, &solution, false)?;
        assert_eq!(unrestricted.model_for((0, 1)).unwrap().assignment_count(), 4);
        Ok(())
    }

    #[test]
    fn labels_outside_the_candidates_never_widen_a_feasible_model() -> Result<()> {
        // A loaded solution may label a match the model never offered; the
        // feasible path must ignore it instead of registering a new candidate.
        let graphs = (0..2).map(|id| Graph::new(id, 2)).collect();
        let mut model = MgmModel::new(graphs).unwrap();
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -1.0).unwrap();
        model.add_model(gm).unwrap();

        let mut labelings = IndexMap::new();
        labelings.insert((0, 1), vec![Some(1), None]);
        let solution = MgmSolution { labelings };

        let feasible = build_sync_model(&model, &solution, true)?;
        let gm = feasible.model_for((0, 1)).unwrap();
        assert_eq!(gm.assignment_count(), 1);
        assert_eq!(gm.costs.unary((0, 0)), Some(0.0));
        assert_eq!(gm.costs.unary((0, 1)), None);

        // The unrestricted variant has the candidate and may reward it.
        let unrestricted = build_sync_model(&model, &solution, false)?;
        let gm = unrestricted.model_for((0, 1)).unwrap();
        assert_eq!(gm.costs.unary((0, 1)), Some(-1.0));
        Ok(())
    }

    #[test]
    fn isolated_nodes_are_tolerated() -> Result<()> {
        // Node (0, 1) has no candidate at all; the sync pipeline must leave
        // it unmatched rather than fail.
        let graphs = (0..2).map(|id| Graph::new(id, 2)).collect();
        let mut model = MgmModel::new(graphs).unwrap();
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -1.0).unwrap();
        model.add_model(gm).unwrap();

        let mut labelings = IndexMap::new();
        labelings.insert((0, 1), vec![Some(0), None]);
        let solution = MgmSolution { labelings };

        let sync_model = build_sync_model(&model, &solution, true)?;
        let order = MatchingOrder::sequential(&sync_model);
        let manager = SequentialGenerator::new(&sync_model).generate(&order)?;
        let synced = manager.export_solution(&sync_model);
        assert_eq!(synced.labelings[&(0, 1)], vec![Some(0), None]);
        Ok(())
    }
}
