use indexmap::IndexMap;

/// Energy assigned to a labeling that activates an assignment absent from the
/// cost table. Absent entries mean "forbidden", not "free".
pub const INFINITY_COST: f64 = 1e99;

/// A candidate match between one node of the first graph and one node of the
/// second graph of a pairwise model.
pub type Assignment = (usize, usize);

/// A pair of assignments carrying a joint (pairwise) cost. Stored in canonical
/// order so that each unordered pair has exactly one key.
pub type EdgePair = (Assignment, Assignment);

pub fn canonical_edge(a: Assignment, b: Assignment) -> EdgePair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Sparse unary and pairwise cost tables for one pairwise matching problem.
///
/// Iteration order is insertion order (`IndexMap`), which keeps every
/// downstream tie-break deterministic for a given input.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    unary: IndexMap<Assignment, f64>,
    pairwise: IndexMap<EdgePair, f64>,
}

impl CostTable {
    pub fn with_capacity(no_unary: usize, no_pairwise: usize) -> Self {
        Self {
            unary: IndexMap::with_capacity(no_unary),
            pairwise: IndexMap::with_capacity(no_pairwise),
        }
    }

    pub fn set_unary(&mut self, assignment: Assignment, cost: f64) {
        self.unary.insert(assignment, cost);
    }

    /// Adds `cost` onto the existing unary entry, creating it at zero first.
    pub fn accumulate_unary(&mut self, assignment: Assignment, cost: f64) {
        *self.unary.entry(assignment).or_insert(0.0) += cost;
    }

    pub fn unary(&self, assignment: Assignment) -> Option<f64> {
        self.unary.get(&assignment).copied()
    }

    pub fn contains_unary(&self, assignment: Assignment) -> bool {
        self.unary.contains_key(&assignment)
    }

    pub fn set_pairwise(&mut self, a: Assignment, b: Assignment, cost: f64) {
        self.pairwise.insert(canonical_edge(a, b), cost);
    }

    /// Adds `cost` onto the existing pairwise entry, creating it at zero first.
    pub fn accumulate_pairwise(&mut self, a: Assignment, b: Assignment, cost: f64) {
        *self.pairwise.entry(canonical_edge(a, b)).or_insert(0.0) += cost;
    }

    pub fn pairwise(&self, a: Assignment, b: Assignment) -> Option<f64> {
        self.pairwise.get(&canonical_edge(a, b)).copied()
    }

    pub fn unary_count(&self) -> usize {
        self.unary.len()
    }

    pub fn pairwise_count(&self) -> usize {
        self.pairwise.len()
    }

    pub fn iter_unary(&self) -> impl Iterator<Item = (Assignment, f64)> + '_ {
        self.unary.iter().map(|(a, c)| (*a, *c))
    }

    pub fn iter_pairwise(&self) -> impl Iterator<Item = (EdgePair, f64)> + '_ {
        self.pairwise.iter().map(|(e, c)| (*e, *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairwise_keys_are_canonical() {
        let mut table = CostTable::default();
        table.set_pairwise((3, 1), (0, 2), -0.5);
        assert_eq!(table.pairwise((0, 2), (3, 1)), Some(-0.5));
        assert_eq!(table.pairwise((3, 1), (0, 2)), Some(-0.5));
        assert_eq!(table.pairwise_count(), 1);
    }

    #[test]
    fn absent_entries_are_not_zero() {
        let mut table = CostTable::default();
        table.set_unary((0, 0), -1.0);
        assert_eq!(table.unary((0, 1)), None);
        assert!(table.contains_unary((0, 0)));
    }
}
