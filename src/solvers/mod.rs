pub mod generator;
pub mod lap;
pub mod local_search;
pub mod qap;
pub mod swap;

use anyhow::Result;

pub use generator::{IncrementalGenerator, ParallelGenerator, SequentialGenerator};
pub use lap::LapSolver;
pub use local_search::{GmLocalSearcher, ParallelGmLocalSearcher};
pub use qap::QapSolver;
pub use swap::SwapOptimizer;

use crate::model::multigraph::GmModel;
use crate::solution::{GmSolution, Labeling};

/// Routes a pairwise problem by its edge count: zero edges is an exact linear
/// assignment, anything else goes to the quadratic heuristic. The routing is a
/// hard rule with no fallback in either direction.
pub fn solve_pairwise(model: &GmModel) -> Result<GmSolution> {
    solve_pairwise_seeded(model, None)
}

/// Seeded variant; the exact path ignores the seed since it does not need one.
pub fn solve_pairwise_seeded(model: &GmModel, seed: Option<&Labeling>) -> Result<GmSolution> {
    if model.edge_count() == 0 {
        LapSolver::new(model).solve()
    } else {
        QapSolver::new(model).solve_seeded(seed)
    }
}
