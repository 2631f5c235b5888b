pub mod costs;
pub mod multigraph;
pub mod parser;

pub use costs::{canonical_edge, Assignment, CostTable, EdgePair, INFINITY_COST};
pub use multigraph::{canonical_pair, GmModel, Graph, MgmModel, PairId};
pub use parser::ModelParser;
