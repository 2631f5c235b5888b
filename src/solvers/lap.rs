use anyhow::{bail, Result};

use crate::model::costs::INFINITY_COST;
use crate::model::multigraph::GmModel;
use crate::solution::{GmSolution, Labeling};

/// Exact solver for edge-free pairwise models.
///
/// The partial-assignment problem is reduced to a square-ish rectangular LAP
/// by appending one zero-cost dummy column per row; a row landing on its dummy
/// column means the node stays unmatched. Absent table entries enter the dense
/// matrix as `INFINITY_COST`, so forbidden matches lose against "unmatched" in
/// every comparison.
pub struct LapSolver<'a> {
    model: &'a GmModel,
}

impl<'a> LapSolver<'a> {
    pub fn new(model: &'a GmModel) -> Self {
        Self { model }
    }

    pub fn solve(&self) -> Result<GmSolution> {
        let nr = self.model.graph1.node_count;
        let real = self.model.graph2.node_count;
        let nc = real + nr;

        let mut cost = vec![INFINITY_COST; nr * nc];
        for ((node1, node2), c) in self.model.costs.iter_unary() {
            cost[node1 * nc + node2] = c;
        }
        for row in 0..nr {
            cost[row * nc + real + row] = 0.0;
        }

        let col4row = shortest_augmenting_paths(nr, nc, &cost)?;
        let labeling: Labeling = col4row
            .iter()
            .map(|&col| if col < real { Some(col) } else { None })
            .collect();
        Ok(GmSolution::from_labeling(self.model, labeling))
    }
}

/// Shortest-augmenting-path LAP over a dense row-major matrix, `nr <= nc`.
/// Maintains dual potentials `u`/`v` and grows one augmenting path per row.
/// Ties prefer an unassigned column, otherwise the first candidate scanned;
/// both rules are deterministic for a fixed matrix.
fn shortest_augmenting_paths(nr: usize, nc: usize, cost: &[f64]) -> Result<Vec<usize>> {
    debug_assert!(nr <= nc);
    let mut u = vec![0.0; nr];
    let mut v = vec![0.0; nc];
    let mut shortest = vec![0.0; nc];
    let mut path = vec![usize::MAX; nc];
    let mut col4row = vec![usize::MAX; nr];
    let mut row4col = vec![usize::MAX; nc];
    let mut scanned_rows = vec![false; nr];
    let mut scanned_cols = vec![false; nc];
    let mut remaining = vec![0usize; nc];

    for cur_row in 0..nr {
        let mut min_val = 0.0;
        let mut i = cur_row;
        let mut num_remaining = nc;
        for (it, slot) in remaining.iter_mut().enumerate() {
            *slot = nc - it - 1;
        }
        scanned_rows.fill(false);
        scanned_cols.fill(false);
        shortest.fill(f64::INFINITY);

        let mut sink = usize::MAX;
        while sink == usize::MAX {
            let mut index = usize::MAX;
            let mut lowest = f64::INFINITY;
            scanned_rows[i] = true;

            for it in 0..num_remaining {
                let j = remaining[it];
                let reduced = min_val + cost[i * nc + j] - u[i] - v[j];
                if reduced < shortest[j] {
                    path[j] = i;
                    shortest[j] = reduced;
                }
                if shortest[j] < lowest
                    || (shortest[j] == lowest && row4col[j] == usize::MAX)
                {
                    lowest = shortest[j];
                    index = it;
                }
            }

            min_val = lowest;
            if min_val.is_infinite() {
                bail!("assignment problem is infeasible");
            }

            let j = remaining[index];
            if row4col[j] == usize::MAX {
                sink = j;
            } else {
                i = row4col[j];
            }
            scanned_cols[j] = true;
            num_remaining -= 1;
            remaining[index] = remaining[num_remaining];
        }

        u[cur_row] += min_val;
        for row in 0..nr {
            if scanned_rows[row] && row != cur_row {
                u[row] += min_val - shortest[col4row[row]];
            }
        }
        for col in 0..nc {
            if scanned_cols[col] {
                v[col] -= min_val - shortest[col];
            }
        }

        let mut j = sink;
        loop {
            let i = path[j];
            row4col[j] = i;
            std::mem::swap(&mut col4row[i], &mut j);
            if i == cur_row {
                break;
            }
        }
    }

    Ok(col4row)
}
