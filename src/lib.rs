pub mod cliques;
pub mod io;
pub mod model;
pub mod order;
pub mod runner;
pub mod solution;
pub mod solvers;
pub mod sync;

pub use cliques::{CliqueManager, CliqueTable};
pub use io::{SolutionReader, SolutionWriter};
pub use model::{GmModel, Graph, MgmModel, ModelParser};
pub use order::MatchingOrder;
pub use runner::{OptimizationLevel, RunConfig, Runner};
pub use solution::{GmSolution, Labeling, MgmSolution};
pub use solvers::{
    solve_pairwise, GmLocalSearcher, IncrementalGenerator, LapSolver, ParallelGenerator,
    ParallelGmLocalSearcher, QapSolver, SequentialGenerator, SwapOptimizer,
};
pub use sync::build_sync_model;
