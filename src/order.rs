use anyhow::{bail, Result};
use indexmap::IndexSet;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::model::multigraph::{MgmModel, PairId};

/// The fixed sequence of canonical graph pairs processed during construction
/// and swept by the GM local searcher. Built once per run and reused so that
/// successive search rounds stay comparable.
#[derive(Debug, Clone)]
pub struct MatchingOrder {
    pairs: Vec<PairId>,
}

impl MatchingOrder {
    /// All canonical pairs of the model in ascending order.
    pub fn sequential(model: &MgmModel) -> Self {
        Self {
            pairs: model.canonical_pairs(),
        }
    }

    /// Reproducible random permutation of the model's pairs.
    pub fn random(model: &MgmModel, seed: u64) -> Self {
        let mut pairs = model.canonical_pairs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        pairs.shuffle(&mut rng);
        Self { pairs }
    }

    /// Builds from an explicit sequence; validated against the model.
    pub fn from_pairs(model: &MgmModel, pairs: Vec<PairId>) -> Result<Self> {
        let order = Self { pairs };
        order.validate(model)?;
        Ok(order)
    }

    /// Restriction to the pairs lying entirely inside a graph subset, keeping
    /// their relative order. Incremental construction sweeps such a
    /// restriction before the remaining graphs are matched in.
    pub fn restrict_to(&self, graphs: &IndexSet<usize>) -> Self {
        Self {
            pairs: self
                .pairs
                .iter()
                .copied()
                .filter(|(g1, g2)| graphs.contains(g1) && graphs.contains(g2))
                .collect(),
        }
    }

    /// A missing or duplicated pair is a precondition violation; rejected
    /// before construction ever begins.
    pub fn validate(&self, model: &MgmModel) -> Result<()> {
        let mut seen = IndexSet::with_capacity(self.pairs.len());
        for &(g1, g2) in &self.pairs {
            if g1 >= g2 {
                bail!("matching order pair ({g1}, {g2}) is not canonical");
            }
            if model.model_for((g1, g2)).is_none() {
                bail!("matching order pair ({g1}, {g2}) has no model");
            }
            if !seen.insert((g1, g2)) {
                bail!("matching order duplicates pair ({g1}, {g2})");
            }
        }
        if seen.len() != model.models.len() {
            bail!(
                "matching order covers {} of {} model pairs",
                seen.len(),
                model.models.len()
            );
        }
        Ok(())
    }

    pub fn pairs(&self) -> &[PairId] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
