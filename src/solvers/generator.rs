use anyhow::{bail, Result};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::cliques::CliqueManager;
use crate::model::costs::Assignment;
use crate::model::multigraph::{canonical_pair, GmModel, Graph, MgmModel, PairId};
use crate::order::MatchingOrder;
use crate::solution::Labeling;
use crate::solvers::local_search::GmLocalSearcher;
use crate::solvers::solve_pairwise;

/// The pairwise problem one construction step actually solves: cliques
/// touching the pair's first graph against cliques touching its second, with
/// node-level costs aggregated up to clique level.
pub struct EffectiveModel {
    pub gm: GmModel,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl EffectiveModel {
    /// Translates an effective labeling back into clique merges
    /// `(target, source)`, in ascending left-clique order.
    pub fn merges(&self, labeling: &Labeling) -> Vec<(usize, usize)> {
        labeling
            .iter()
            .enumerate()
            .filter_map(|(lpos, rpos)| rpos.map(|rpos| (self.left[lpos], self.right[rpos])))
            .collect()
    }

    pub fn left_position(&self, clique_idx: usize) -> Option<usize> {
        self.left.binary_search(&clique_idx).ok()
    }

    pub fn right_position(&self, clique_idx: usize) -> Option<usize> {
        self.right.binary_search(&clique_idx).ok()
    }
}

enum Endpoint {
    /// Both nodes of the assignment already share a clique.
    Realized,
    /// The assignment becomes active iff this effective option is chosen.
    Option(Assignment),
    /// Not realized and not decidable in this step.
    Inactive,
}

/// Builds the effective clique-to-clique model for one canonical pair.
///
/// An option `(A, B)` survives only with full coverage: every graph pair
/// between the two cliques that has a cost model must also carry the
/// corresponding assignment, otherwise merging would activate a forbidden
/// match. Options joining cliques that share a graph are masked out entirely.
pub struct PairMatcher<'a> {
    model: &'a MgmModel,
    manager: &'a CliqueManager,
    pair: PairId,
}

impl<'a> PairMatcher<'a> {
    pub fn new(model: &'a MgmModel, manager: &'a CliqueManager, pair: PairId) -> Self {
        Self {
            model,
            manager,
            pair,
        }
    }

    pub fn build(&self) -> Result<EffectiveModel> {
        let (g1, g2) = self.pair;
        let mut left = Vec::new();
        let mut right = Vec::new();
        for (idx, clique) in self.manager.table().iter().enumerate() {
            if clique.contains_key(&g1) {
                left.push(idx);
            }
            if clique.contains_key(&g2) {
                right.push(idx);
            }
        }

        let mut gm = GmModel::new(
            Graph::new(g1, left.len()),
            Graph::new(g2, right.len()),
        );
        let mut options: IndexMap<(usize, usize), Assignment> = IndexMap::new();

        for (lpos, &a_idx) in left.iter().enumerate() {
            let a = self.manager.clique(a_idx);
            'options: for (rpos, &b_idx) in right.iter().enumerate() {
                if a_idx == b_idx {
                    continue;
                }
                let b = self.manager.clique(b_idx);
                let mut total = 0.0;
                let mut covered = 0usize;
                for (&ga, &na) in a.iter() {
                    if b.contains_key(&ga) {
                        continue 'options;
                    }
                    for (&gb, &nb) in b.iter() {
                        if self.model.model_for(canonical_pair(ga, gb)).is_none() {
                            continue;
                        }
                        match self.model.unary_between(ga, na, gb, nb) {
                            Some(cost) => {
                                total += cost;
                                covered += 1;
                            }
                            // Incomplete coverage, the option is forbidden.
                            None => continue 'options,
                        }
                    }
                }
                if covered == 0 {
                    continue;
                }
                gm.add_assignment(lpos, rpos, total)?;
                options.insert((a_idx, b_idx), (lpos, rpos));
            }
        }

        // Edge costs survive aggregation in two forms: between two open
        // options as an effective edge, and between an open option and an
        // already realized assignment as an addition to the option's unary.
        for (&(ga, gb), pair_model) in &self.model.models {
            for ((a1, a2), cost) in pair_model.costs.iter_pairwise() {
                let e1 = self.locate(ga, a1.0, gb, a1.1, &options);
                let e2 = self.locate(ga, a2.0, gb, a2.1, &options);
                match (e1, e2) {
                    (Endpoint::Option(x), Endpoint::Option(y)) => {
                        if x != y {
                            gm.costs.accumulate_pairwise(x, y, cost);
                        }
                    }
                    (Endpoint::Option(x), Endpoint::Realized)
                    | (Endpoint::Realized, Endpoint::Option(x)) => {
                        gm.costs.accumulate_unary(x, cost);
                    }
                    _ => {}
                }
            }
        }

        Ok(EffectiveModel { gm, left, right })
    }

    fn locate(
        &self,
        ga: usize,
        na: usize,
        gb: usize,
        nb: usize,
        options: &IndexMap<(usize, usize), Assignment>,
    ) -> Endpoint {
        let ca = self.manager.clique_of(ga, na);
        let cb = self.manager.clique_of(gb, nb);
        if ca == cb {
            return Endpoint::Realized;
        }
        if let Some(&assignment) = options.get(&(ca, cb)) {
            return Endpoint::Option(assignment);
        }
        if let Some(&assignment) = options.get(&(cb, ca)) {
            return Endpoint::Option(assignment);
        }
        Endpoint::Inactive
    }
}

pub(crate) fn apply_merges(
    manager: &mut CliqueManager,
    effective: &EffectiveModel,
    labeling: &Labeling,
) {
    for (target, source) in effective.merges(labeling) {
        if !manager.merge(target, source) {
            // Masking upstream should make this unreachable; the move is
            // dropped rather than corrupting the partition.
            warn!("Dropped illegal merge of cliques {target} and {source}");
        }
    }
}

/// Construction by pairwise merging: one effective subproblem per pair of the
/// matching order, processed strictly in order. Later pairs see the cliques
/// earlier merges produced, so the order shapes the result.
pub struct SequentialGenerator<'a> {
    model: &'a MgmModel,
}

impl<'a> SequentialGenerator<'a> {
    pub fn new(model: &'a MgmModel) -> Self {
        Self { model }
    }

    pub fn generate(&self, order: &MatchingOrder) -> Result<CliqueManager> {
        order.validate(self.model)?;
        let mut manager = CliqueManager::singletons(self.model);
        construct_pairs(self.model, &mut manager, order.pairs())?;
        info!(
            "Constructed solution. Energy: {}",
            manager.export_solution(self.model).evaluate(self.model)
        );
        Ok(manager)
    }
}

/// One construction step per pair, strictly in the given sequence.
fn construct_pairs(model: &MgmModel, manager: &mut CliqueManager, pairs: &[PairId]) -> Result<()> {
    for (step, &pair) in pairs.iter().enumerate() {
        debug!("Step {}/{}: pair {:?}", step + 1, pairs.len(), pair);
        let effective = PairMatcher::new(model, manager, pair).build()?;
        let solution = solve_pairwise(&effective.gm)?;
        apply_merges(manager, &effective, &solution.labeling);
        manager.prune();
    }
    Ok(())
}

/// Incremental construction: pairs lying inside a small leading subset of
/// graphs are matched first, that partial solution is polished by local
/// search, and construction then resumes over the remaining pairs. Early
/// mistakes get corrected while the partition is still cheap to change,
/// instead of being locked in by every later merge.
pub struct IncrementalGenerator<'a> {
    model: &'a MgmModel,
    subset_size: usize,
}

impl<'a> IncrementalGenerator<'a> {
    pub fn new(model: &'a MgmModel, subset_size: usize) -> Self {
        Self { model, subset_size }
    }

    pub fn generate(&self, order: &MatchingOrder) -> Result<CliqueManager> {
        order.validate(self.model)?;
        if self.subset_size < 2 {
            bail!("incremental construction needs a subset of at least two graphs");
        }
        let subset = self.leading_graphs(order);
        let leading = order.restrict_to(&subset);
        let remaining: Vec<PairId> = order
            .pairs()
            .iter()
            .copied()
            .filter(|&(g1, g2)| !(subset.contains(&g1) && subset.contains(&g2)))
            .collect();

        let mut manager = CliqueManager::singletons(self.model);
        info!(
            "Constructing over {} leading graphs ({} of {} pairs)",
            subset.len(),
            leading.len(),
            order.len()
        );
        construct_pairs(self.model, &mut manager, leading.pairs())?;

        info!("Improving the partial solution");
        let searcher = GmLocalSearcher::new(self.model, &leading);
        let mut table = manager.export_table();
        loop {
            let (next, improved) = searcher.search(table)?;
            table = next;
            if !improved {
                break;
            }
        }
        manager = CliqueManager::reconstruct_from(self.model, table)?;

        info!("Constructing over the {} remaining pairs", remaining.len());
        construct_pairs(self.model, &mut manager, &remaining)?;
        info!(
            "Constructed solution. Energy: {}",
            manager.export_solution(self.model).evaluate(self.model)
        );
        Ok(manager)
    }

    /// The first `subset_size` distinct graphs in order of appearance.
    fn leading_graphs(&self, order: &MatchingOrder) -> IndexSet<usize> {
        let mut subset = IndexSet::new();
        for &(g1, g2) in order.pairs() {
            for graph_id in [g1, g2] {
                if subset.len() < self.subset_size {
                    subset.insert(graph_id);
                }
            }
        }
        subset
    }
}

/// Parallel construction. Pairs are taken from the order in prefix batches
/// whose clique footprints are disjoint; a batch is solved concurrently
/// against a fixed snapshot and its merges are applied serially. A pair whose
/// footprint overlaps an earlier pair in the same batch waits for the next
/// batch, which keeps the end state equal to sequential processing of the
/// same order.
pub struct ParallelGenerator<'a> {
    model: &'a MgmModel,
    threads: usize,
}

impl<'a> ParallelGenerator<'a> {
    pub fn new(model: &'a MgmModel, threads: usize) -> Self {
        Self { model, threads }
    }

    pub fn generate(&self, order: &MatchingOrder) -> Result<CliqueManager> {
        order.validate(self.model)?;
        let pool = ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        let mut manager = CliqueManager::singletons(self.model);
        let pairs = order.pairs();
        let mut next = 0;

        while next < pairs.len() {
            let batch = disjoint_batch(&manager, &pairs[next..]);
            next += batch.len();
            debug!("Solving batch of {} pairs", batch.len());

            let snapshot = &manager;
            let results: Vec<(EffectiveModel, Labeling)> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|&pair| {
                        let effective = PairMatcher::new(self.model, snapshot, pair).build()?;
                        let solution = solve_pairwise(&effective.gm)?;
                        Ok((effective, solution.labeling))
                    })
                    .collect::<Result<_>>()
            })?;

            for (effective, labeling) in &results {
                apply_merges(&mut manager, effective, labeling);
            }
            manager.prune();
        }
        info!(
            "Constructed solution. Energy: {}",
            manager.export_solution(self.model).evaluate(self.model)
        );
        Ok(manager)
    }
}

/// Longest prefix of `pairs` whose clique footprints are pairwise disjoint.
/// Taking a prefix (rather than any disjoint subset) preserves the sequential
/// processing order of conflicting pairs.
fn disjoint_batch(manager: &CliqueManager, pairs: &[PairId]) -> Vec<PairId> {
    let mut used = vec![false; manager.clique_count()];
    let mut batch = Vec::new();
    for &(g1, g2) in pairs {
        let footprint: Vec<usize> = manager
            .table()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains_key(&g1) || c.contains_key(&g2))
            .map(|(idx, _)| idx)
            .collect();
        if footprint.iter().any(|&idx| used[idx]) {
            break;
        }
        for &idx in &footprint {
            used[idx] = true;
        }
        batch.push((g1, g2));
    }
    batch
}
