use anyhow::Result;
use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::cliques::{CliqueManager, CliqueTable};
use crate::model::multigraph::{MgmModel, PairId};
use crate::order::MatchingOrder;
use crate::solvers::generator::{apply_merges, PairMatcher};
use crate::solvers::solve_pairwise_seeded;

/// Re-solves one pair's effective subproblem against the current partition.
///
/// The pair's existing bindings are released first: every second-graph node
/// co-resident with a first-graph node moves into a fresh singleton. The old
/// binding is handed to the solver as a warm seed, so the previous state stays
/// reachable and a returned improvement is a genuine one. Accepted only on a
/// strict decrease of total energy; `None` means the pair stays as it was.
fn resolve_pair(
    model: &MgmModel,
    manager: &CliqueManager,
    pair: PairId,
    base_energy: f64,
) -> Result<Option<(CliqueManager, f64)>> {
    let (g1, g2) = pair;
    let mut working = manager.clone();

    let mut released: Vec<(usize, usize)> = Vec::new();
    for idx in 0..working.clique_count() {
        let clique = working.clique(idx);
        if !clique.contains_key(&g1) {
            continue;
        }
        if let Some(&node) = clique.get(&g2) {
            let singleton = working.detach(g2, node);
            released.push((idx, singleton));
        }
    }

    let effective = PairMatcher::new(model, &working, pair).build()?;
    let mut seed = vec![None; effective.gm.graph1.node_count];
    for &(old_clique, singleton) in &released {
        if let (Some(lpos), Some(rpos)) = (
            effective.left_position(old_clique),
            effective.right_position(singleton),
        ) {
            seed[lpos] = Some(rpos);
        }
    }

    let solution = solve_pairwise_seeded(&effective.gm, Some(&seed))?;
    apply_merges(&mut working, &effective, &solution.labeling);
    working.prune();

    let energy = working.export_solution(model).evaluate(model);
    if energy < base_energy {
        Ok(Some((working, energy)))
    } else {
        Ok(None)
    }
}

/// One sweep of pairwise local search over the matching order.
pub struct GmLocalSearcher<'a> {
    model: &'a MgmModel,
    order: &'a MatchingOrder,
}

impl<'a> GmLocalSearcher<'a> {
    pub fn new(model: &'a MgmModel, order: &'a MatchingOrder) -> Self {
        Self { model, order }
    }

    /// Visits every pair once and returns the updated partition together with
    /// whether any pair improved. Callers loop until a sweep reports no
    /// improvement.
    pub fn search(&self, table: CliqueTable) -> Result<(CliqueTable, bool)> {
        let mut manager = CliqueManager::reconstruct_from(self.model, table)?;
        let mut energy = manager.export_solution(self.model).evaluate(self.model);
        let mut improved = false;

        for &pair in self.order.pairs() {
            if let Some((better, better_energy)) =
                resolve_pair(self.model, &manager, pair, energy)?
            {
                debug!("Pair {:?} improved energy to {}", pair, better_energy);
                manager = better;
                energy = better_energy;
                improved = true;
            }
        }
        info!("Local search sweep finished. Energy: {energy}");
        Ok((manager.export_table(), improved))
    }
}

/// Parallel sweep: evaluates the not-yet-visited pairs concurrently against a
/// snapshot, adopts the best improvement, and repeats on the updated state.
/// Adoption is serial, so no update is ever lost to a concurrent writer.
pub struct ParallelGmLocalSearcher<'a> {
    model: &'a MgmModel,
    order: &'a MatchingOrder,
    threads: usize,
}

impl<'a> ParallelGmLocalSearcher<'a> {
    pub fn new(model: &'a MgmModel, order: &'a MatchingOrder, threads: usize) -> Self {
        Self {
            model,
            order,
            threads,
        }
    }

    pub fn search(&self, table: CliqueTable) -> Result<(CliqueTable, bool)> {
        let pool = ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        let mut manager = CliqueManager::reconstruct_from(self.model, table)?;
        let mut energy = manager.export_solution(self.model).evaluate(self.model);
        let mut improved = false;
        let mut remaining: Vec<PairId> = self.order.pairs().to_vec();

        while !remaining.is_empty() {
            let snapshot = &manager;
            let base = energy;
            let candidates: Vec<Option<(CliqueManager, f64)>> = pool.install(|| {
                remaining
                    .par_iter()
                    .map(|&pair| resolve_pair(self.model, snapshot, pair, base))
                    .collect::<Result<_>>()
            })?;

            // Lowest energy wins; ties go to the earliest pair in the order.
            let best = candidates
                .into_iter()
                .enumerate()
                .filter_map(|(idx, c)| c.map(|(m, e)| (idx, m, e)))
                .min_by(|a, b| {
                    a.2.partial_cmp(&b.2)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                });

            match best {
                Some((idx, better, better_energy)) => {
                    debug!(
                        "Pair {:?} improved energy to {}",
                        remaining[idx], better_energy
                    );
                    manager = better;
                    energy = better_energy;
                    improved = true;
                    remaining.remove(idx);
                }
                None => break,
            }
        }
        info!("Parallel local search sweep finished. Energy: {energy}");
        Ok((manager.export_table(), improved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::multigraph::{GmModel, Graph};
    use crate::solvers::generator::SequentialGenerator;

    /// Two graphs where construction under a bad order gets the off-diagonal
    /// and local search has room to improve.
    fn crossed_model() -> MgmModel {
        let graphs = (0..2).map(|id| Graph::new(id, 2)).collect();
        let mut model = MgmModel::new(graphs).unwrap();
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -3.0).unwrap();
        gm.add_assignment(1, 1, -3.0).unwrap();
        gm.add_assignment(0, 1, -1.0).unwrap();
        gm.add_assignment(1, 0, -1.0).unwrap();
        model.add_model(gm).unwrap();
        model
    }

    #[test]
    fn sweep_reaches_a_fixpoint() -> Result<()> {
        let model = crossed_model();
        let order = MatchingOrder::sequential(&model);
        let manager = SequentialGenerator::new(&model).generate(&order)?;

        let searcher = GmLocalSearcher::new(&model, &order);
        let (table, improved) = searcher.search(manager.export_table())?;
        // Construction already found the optimum here; the sweep must agree.
        assert!(!improved);
        let solution = CliqueManager::reconstruct_from(&model, table)?
            .export_solution(&model);
        assert_eq!(solution.evaluate(&model), -6.0);
        Ok(())
    }

    #[test]
    fn sweep_improves_a_degraded_partition() -> Result<()> {
        let model = crossed_model();
        let order = MatchingOrder::sequential(&model);

        // Start from the off-diagonal matching, energy -2 instead of -6.
        let mut manager = CliqueManager::singletons(&model);
        let a = manager.clique_of(0, 0);
        let b = manager.clique_of(0, 1);
        assert!(manager.merge(a, manager.clique_of(1, 1)));
        assert!(manager.merge(b, manager.clique_of(1, 0)));
        manager.prune();
        assert_eq!(manager.export_solution(&model).evaluate(&model), -2.0);

        let searcher = GmLocalSearcher::new(&model, &order);
        let (table, improved) = searcher.search(manager.export_table())?;
        assert!(improved);
        let solution = CliqueManager::reconstruct_from(&model, table)?
            .export_solution(&model);
        assert_eq!(solution.evaluate(&model), -6.0);
        Ok(())
    }

    #[test]
    fn parallel_sweep_matches_sequential() -> Result<()> {
        let model = crossed_model();
        let order = MatchingOrder::sequential(&model);
        let manager = SequentialGenerator::new(&model).generate(&order)?;

        let serial = GmLocalSearcher::new(&model, &order);
        let parallel = ParallelGmLocalSearcher::new(&model, &order, 2);
        let (t1, _) = serial.search(manager.table().clone())?;
        let (t2, _) = parallel.search(manager.table().clone())?;
        let e1 = CliqueManager::reconstruct_from(&model, t1)?
            .export_solution(&model)
            .evaluate(&model);
        let e2 = CliqueManager::reconstruct_from(&model, t2)?
            .export_solution(&model)
            .evaluate(&model);
        assert_eq!(e1, e2);
        Ok(())
    }
}
