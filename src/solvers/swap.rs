use anyhow::Result;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

use crate::cliques::{Clique, CliqueManager, CliqueTable};
use crate::model::costs::{canonical_edge, Assignment, EdgePair, INFINITY_COST};
use crate::model::multigraph::{canonical_pair, MgmModel, PairId};

/// Improvements smaller than this are treated as floating-point noise and
/// rejected, which keeps the pass count finite.
const SWAP_THRESHOLD: f64 = -1e-6;

/// Node-level optimizer for moves the pairwise searcher cannot express:
/// relocating one node into another clique (displacing a same-graph occupant
/// back into the source clique) or out into a fresh singleton. Each move is
/// scored by the exact change in total energy across every pair the touched
/// nodes participate in; the best strictly improving move per node is applied
/// immediately.
pub struct SwapOptimizer<'a> {
    model: &'a MgmModel,
    adjacency: IndexMap<PairId, IndexMap<Assignment, Vec<(Assignment, f64)>>>,
}

impl<'a> SwapOptimizer<'a> {
    pub fn new(model: &'a MgmModel) -> Self {
        let mut adjacency: IndexMap<PairId, IndexMap<Assignment, Vec<(Assignment, f64)>>> =
            IndexMap::new();
        for (&pair, gm) in &model.models {
            if gm.edge_count() == 0 {
                continue;
            }
            let entry = adjacency.entry(pair).or_default();
            for ((a, b), cost) in gm.costs.iter_pairwise() {
                entry.entry(a).or_default().push((b, cost));
                if a != b {
                    entry.entry(b).or_default().push((a, cost));
                }
            }
        }
        Self { model, adjacency }
    }

    /// One full pass over all nodes, in ascending (graph, node) order.
    /// Returns the updated partition and whether any move was applied.
    pub fn search(&self, table: CliqueTable) -> Result<(CliqueTable, bool)> {
        let mut manager = CliqueManager::reconstruct_from(self.model, table)?;
        let mut improved = false;

        for graph_id in 0..self.model.graph_count() {
            for node in 0..self.model.graphs[graph_id].node_count {
                let current = manager.clique_of(graph_id, node);
                let mut best: Option<(Option<usize>, f64)> = None;

                for target in 0..manager.clique_count() {
                    if target == current {
                        continue;
                    }
                    let delta = self.flip_delta(&manager, graph_id, node, Some(target));
                    if delta < best.map_or(SWAP_THRESHOLD, |(_, d)| d) {
                        best = Some((Some(target), delta));
                    }
                }
                if manager.clique(current).len() > 1 {
                    let delta = self.flip_delta(&manager, graph_id, node, None);
                    if delta < best.map_or(SWAP_THRESHOLD, |(_, d)| d) {
                        best = Some((None, delta));
                    }
                }

                if let Some((target, delta)) = best {
                    debug!(
                        "Moving node ({graph_id}, {node}) to {:?}: delta {delta}",
                        target
                    );
                    apply_move(&mut manager, graph_id, node, target);
                    improved = true;
                }
            }
        }
        info!(
            "Swap pass finished. Energy: {}",
            manager.export_solution(self.model).evaluate(self.model)
        );
        Ok((manager.export_table(), improved))
    }

    /// Exact energy change of moving node `(graph_id, node)` into `target`
    /// (`None` meaning a fresh singleton). If the target already holds a node
    /// of the same graph, that occupant moves into the source clique, and its
    /// cost changes are part of the delta.
    fn flip_delta(
        &self,
        manager: &CliqueManager,
        graph_id: usize,
        node: usize,
        target: Option<usize>,
    ) -> f64 {
        let source = manager.clique(manager.clique_of(graph_id, node));
        let empty = Clique::new();
        let (target_clique, occupant) = match target {
            Some(idx) => {
                let clique = manager.clique(idx);
                (clique, clique.get(&graph_id).copied())
            }
            None => (&empty, None),
        };

        let mut delta = 0.0;
        let mut graphs: IndexSet<usize> = source.keys().copied().collect();
        graphs.extend(target_clique.keys().copied());
        graphs.shift_remove(&graph_id);

        for &h in &graphs {
            if self
                .model
                .model_for(canonical_pair(graph_id, h))
                .is_none()
            {
                continue;
            }
            let source_h = source.get(&h).copied();
            let target_h = target_clique.get(&h).copied();

            // Changed assignments in the (graph_id, h) pair, as
            // (graph_id node, h node) tuples.
            let mut removed: Vec<(usize, usize)> = Vec::new();
            let mut added: Vec<(usize, usize)> = Vec::new();
            if let Some(sh) = source_h {
                removed.push((node, sh));
                if let Some(m) = occupant {
                    added.push((m, sh));
                }
            }
            if let Some(th) = target_h {
                added.push((node, th));
                if let Some(m) = occupant {
                    removed.push((m, th));
                }
            }

            for &(gn, hn) in &removed {
                delta -= self
                    .model
                    .unary_between(graph_id, gn, h, hn)
                    .unwrap_or(INFINITY_COST);
            }
            for &(gn, hn) in &added {
                delta += self
                    .model
                    .unary_between(graph_id, gn, h, hn)
                    .unwrap_or(INFINITY_COST);
            }

            delta += self.edge_delta(manager, graph_id, h, &removed, &added);
        }
        delta
    }

    fn edge_delta(
        &self,
        manager: &CliqueManager,
        graph_id: usize,
        h: usize,
        removed: &[(usize, usize)],
        added: &[(usize, usize)],
    ) -> f64 {
        let pair = canonical_pair(graph_id, h);
        let Some(adjacency) = self.adjacency.get(&pair) else {
            return 0.0;
        };
        let orient = |(gn, hn): (usize, usize)| -> Assignment {
            if graph_id < h {
                (gn, hn)
            } else {
                (hn, gn)
            }
        };
        let removed: Vec<Assignment> = removed.iter().map(|&a| orient(a)).collect();
        let added: Vec<Assignment> = added.iter().map(|&a| orient(a)).collect();

        let active_old = |a: Assignment| {
            manager.clique_of(pair.0, a.0) == manager.clique_of(pair.1, a.1)
        };
        let active_new = |a: Assignment| {
            if removed.contains(&a) {
                false
            } else if added.contains(&a) {
                true
            } else {
                active_old(a)
            }
        };

        let mut delta = 0.0;
        let mut seen: IndexSet<EdgePair> = IndexSet::new();
        for &changed in removed.iter().chain(added.iter()) {
            let Some(incident) = adjacency.get(&changed) else {
                continue;
            };
            for &(other, cost) in incident {
                if !seen.insert(canonical_edge(changed, other)) {
                    continue;
                }
                let was = active_old(changed) && active_old(other);
                let now = active_new(changed) && active_new(other);
                if now && !was {
                    delta += cost;
                } else if was && !now {
                    delta -= cost;
                }
            }
        }
        delta
    }
}

fn apply_move(manager: &mut CliqueManager, graph_id: usize, node: usize, target: Option<usize>) {
    match target {
        None => {
            manager.detach(graph_id, node);
        }
        Some(idx) => {
            let occupant = manager.clique(idx).get(&graph_id).copied();
            let source = manager.clique_of(graph_id, node);
            let moved = manager.detach(graph_id, node);
            if let Some(occupant) = occupant {
                let displaced = manager.detach(graph_id, occupant);
                manager.merge(idx, moved);
                manager.merge(source, displaced);
            } else {
                manager.merge(idx, moved);
            }
        }
    }
    manager.prune();
}
