use anyhow::Result;
use indexmap::IndexMap;
use log::trace;

use crate::model::costs::{Assignment, INFINITY_COST};
use crate::model::multigraph::GmModel;
use crate::solution::{pair_energy, validate_labeling, GmSolution, Labeling};
use crate::solvers::lap::LapSolver;

const MAX_DESCENT_SWEEPS: usize = 25;

/// Heuristic solver for pairwise models with edge costs.
///
/// Candidate labelings come from the edge-blind relaxation (exact LAP over
/// the unary table), a greedy pass that does see edges, and optionally a warm
/// seed. Candidates are fused pairwise by coordinate descent, then polished by
/// single-node relabel sweeps. Every accepted move strictly decreases energy,
/// so the result never falls below the best input candidate, and all
/// tie-breaks scan in ascending node/label order.
pub struct QapSolver<'a> {
    model: &'a GmModel,
    adjacency: IndexMap<Assignment, Vec<(Assignment, f64)>>,
}

impl<'a> QapSolver<'a> {
    pub fn new(model: &'a GmModel) -> Self {
        let mut adjacency: IndexMap<Assignment, Vec<(Assignment, f64)>> = model
            .assignment_list
            .iter()
            .map(|&a| (a, Vec::new()))
            .collect();
        for ((a, b), cost) in model.costs.iter_pairwise() {
            if let Some(list) = adjacency.get_mut(&a) {
                list.push((b, cost));
            }
            if a != b {
                if let Some(list) = adjacency.get_mut(&b) {
                    list.push((a, cost));
                }
            }
        }
        Self { model, adjacency }
    }

    pub fn solve(&self) -> Result<GmSolution> {
        self.solve_seeded(None)
    }

    pub fn solve_seeded(&self, seed: Option<&Labeling>) -> Result<GmSolution> {
        let n1 = self.model.graph1.node_count;
        let n2 = self.model.graph2.node_count;

        let mut candidates: Vec<Labeling> = Vec::with_capacity(3);
        if let Some(seed) = seed {
            validate_labeling(seed, n1, n2)?;
            candidates.push(seed.clone());
        }
        candidates.push(LapSolver::new(self.model).solve()?.labeling);
        candidates.push(self.greedy_labeling());

        let mut best = candidates.remove(self.best_index(&candidates));
        let mut best_energy = pair_energy(self.model, &best);

        loop {
            let mut improved = false;
            for donor in &candidates {
                let fused = self.fuse(&best, donor);
                let fused_energy = pair_energy(self.model, &fused);
                if fused_energy < best_energy {
                    best = fused;
                    best_energy = fused_energy;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }

        let polished = self.descend(best);
        trace!(
            "qap pair ({}, {}): energy {:.6}",
            self.model.graph1.id,
            self.model.graph2.id,
            pair_energy(self.model, &polished)
        );
        Ok(GmSolution::from_labeling(self.model, polished))
    }

    fn best_index(&self, candidates: &[Labeling]) -> usize {
        let mut best = 0;
        let mut best_energy = pair_energy(self.model, &candidates[0]);
        for (idx, candidate) in candidates.iter().enumerate().skip(1) {
            let energy = pair_energy(self.model, candidate);
            if energy < best_energy {
                best = idx;
                best_energy = energy;
            }
        }
        best
    }

    /// Marginal cost of activating `assignment` against the currently active
    /// assignments of every other node. `INFINITY_COST` when the assignment is
    /// not in the table at all.
    fn attach_cost(&self, labeling: &Labeling, assignment: Assignment) -> f64 {
        let Some(unary) = self.model.costs.unary(assignment) else {
            return INFINITY_COST;
        };
        let mut cost = unary;
        if let Some(neighbors) = self.adjacency.get(&assignment) {
            for &(other, edge_cost) in neighbors {
                if other.0 != assignment.0 && labeling[other.0] == Some(other.1) {
                    cost += edge_cost;
                }
            }
        }
        cost
    }

    /// Edge-aware greedy construction: nodes in ascending order, each takes
    /// the cheapest free candidate label, but only if cheaper than staying
    /// unmatched.
    fn greedy_labeling(&self) -> Labeling {
        let n1 = self.model.graph1.node_count;
        let n2 = self.model.graph2.node_count;
        let mut labeling: Labeling = vec![None; n1];
        let mut taken = vec![false; n2];
        for node in 0..n1 {
            let mut best: Option<usize> = None;
            let mut best_cost = 0.0;
            for &label in &self.model.candidates_left[node] {
                if taken[label] {
                    continue;
                }
                let cost = self.attach_cost(&labeling, (node, label));
                if cost < best_cost {
                    best = Some(label);
                    best_cost = cost;
                }
            }
            if let Some(label) = best {
                labeling[node] = Some(label);
                taken[label] = true;
            }
        }
        labeling
    }

    /// Coordinate-descent fusion: walk the nodes where the donor disagrees
    /// with the base and take the donor's label whenever doing so strictly
    /// lowers energy. Labels already held by another node are skipped, so the
    /// injectivity invariant is never at risk.
    fn fuse(&self, base: &Labeling, donor: &Labeling) -> Labeling {
        let n2 = self.model.graph2.node_count;
        let mut current = base.clone();
        let mut taken = vec![false; n2];
        for label in current.iter().flatten() {
            taken[*label] = true;
        }

        for node in 0..current.len() {
            if current[node] == donor[node] {
                continue;
            }
            let old = current[node].take();
            if let Some(old_label) = old {
                taken[old_label] = false;
            }
            let old_cost = match old {
                Some(old_label) => self.attach_cost(&current, (node, old_label)),
                None => 0.0,
            };
            let candidate = match donor[node] {
                Some(label) if !taken[label] => Some(label),
                _ => None,
            };
            let new_cost = match candidate {
                Some(label) => self.attach_cost(&current, (node, label)),
                None => 0.0,
            };

            if new_cost < old_cost {
                current[node] = candidate;
            } else {
                current[node] = old;
            }
            if let Some(label) = current[node] {
                taken[label] = true;
            }
        }
        current
    }

    /// Single-node relabel sweeps: each node may drop its label or move to any
    /// free candidate; the strictly best improving move is applied at once.
    fn descend(&self, mut labeling: Labeling) -> Labeling {
        let n2 = self.model.graph2.node_count;
        let mut taken = vec![false; n2];
        for label in labeling.iter().flatten() {
            taken[*label] = true;
        }

        for _ in 0..MAX_DESCENT_SWEEPS {
            let mut improved = false;
            for node in 0..labeling.len() {
                let old = labeling[node].take();
                if let Some(old_label) = old {
                    taken[old_label] = false;
                }
                let old_cost = match old {
                    Some(old_label) => self.attach_cost(&labeling, (node, old_label)),
                    None => 0.0,
                };

                let mut best = old;
                let mut best_cost = old_cost;
                if old.is_some() && 0.0 < best_cost {
                    best = None;
                    best_cost = 0.0;
                }
                for &label in &self.model.candidates_left[node] {
                    if taken[label] || Some(label) == old {
                        continue;
                    }
                    let cost = self.attach_cost(&labeling, (node, label));
                    if cost < best_cost {
                        best = Some(label);
                        best_cost = cost;
                    }
                }

                if best != old {
                    improved = true;
                }
                labeling[node] = best;
                if let Some(label) = best {
                    taken[label] = true;
                }
            }
            if !improved {
                break;
            }
        }
        labeling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::multigraph::Graph;

    fn edge_model() -> GmModel {
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -1.0).unwrap();
        gm.add_assignment(0, 1, -1.0).unwrap();
        gm.add_assignment(1, 0, -1.0).unwrap();
        gm.add_assignment(1, 1, -1.0).unwrap();
        // The unary table is symmetric; only the edge breaks the tie.
        gm.add_edge((0, 0), (1, 1), -2.0).unwrap();
        gm.add_edge((0, 1), (1, 0), 1.5).unwrap();
        gm
    }

    #[test]
    fn edges_steer_the_matching() -> Result<()> {
        let gm = edge_model();
        let solution = QapSolver::new(&gm).solve()?;
        assert_eq!(solution.labeling, vec![Some(0), Some(1)]);
        assert_eq!(solution.energy, -4.0);
        Ok(())
    }

    #[test]
    fn never_worse_than_the_relaxation() -> Result<()> {
        let gm = edge_model();
        let lap = LapSolver::new(&gm).solve()?;
        let lap_energy = pair_energy(&gm, &lap.labeling);
        let qap = QapSolver::new(&gm).solve()?;
        assert!(qap.energy <= lap_energy);
        Ok(())
    }

    #[test]
    fn warm_seed_is_validated() {
        let gm = edge_model();
        let bad = vec![Some(5), None];
        assert!(QapSolver::new(&gm).solve_seeded(Some(&bad)).is_err());
    }

    #[test]
    fn positive_edges_can_break_a_pair_apart() -> Result<()> {
        let mut gm = GmModel::new(Graph::new(0, 2), Graph::new(1, 2));
        gm.add_assignment(0, 0, -1.0).unwrap();
        gm.add_assignment(1, 1, -1.0).unwrap();
        gm.add_edge((0, 0), (1, 1), 10.0).unwrap();
        let solution = QapSolver::new(&gm).solve()?;
        // Keeping both active costs 8.0; one of them has to go.
        assert!(solution.energy <= -1.0);
        assert!(solution.labeling.iter().filter(|l| l.is_some()).count() == 1);
        Ok(())
    }

    #[test]
    fn seed_survives_when_it_is_already_optimal() -> Result<()> {
        let gm = edge_model();
        let seed = vec![Some(0), Some(1)];
        let solution = QapSolver::new(&gm).solve_seeded(Some(&seed))?;
        assert_eq!(solution.labeling, seed);
        Ok(())
    }
}
