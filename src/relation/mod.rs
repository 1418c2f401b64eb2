//! In-memory indexed relations of arity one and two.

use crate::common::Term;

#[cfg(test)]
mod tests;

enum RelationData {
    /// Sorted ascending. Duplicates are kept: the relation is a multiset.
    Unary(Vec<Term>),
    /// The same multiset of pairs under both sort orders: `by_first` ordered
    /// by `(first, second)`, `by_second` ordered by `(second, first)`.
    Binary {
        by_first: Vec<(Term, Term)>,
        by_second: Vec<(Term, Term)>,
    },
}

/// An immutable tuple store with sorted indexes on every column.
///
/// Both sort orders are built by the constructor, before the relation is ever
/// exposed, so lookups can binary-search and scans can merge-join without
/// further checks.
pub struct IndexedRelation {
    data: RelationData,
}

impl IndexedRelation {
    pub fn unary(mut terms: Vec<Term>) -> IndexedRelation {
        terms.sort_unstable();
        IndexedRelation {
            data: RelationData::Unary(terms),
        }
    }

    pub fn binary(pairs: Vec<(Term, Term)>) -> IndexedRelation {
        let mut by_first = pairs;
        let mut by_second = by_first.clone();
        by_first.sort_unstable();
        by_second.sort_unstable_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        IndexedRelation {
            data: RelationData::Binary {
                by_first,
                by_second,
            },
        }
    }

    pub fn arity(&self) -> usize {
        match &self.data {
            RelationData::Unary(_) => 1,
            RelationData::Binary { .. } => 2,
        }
    }

    pub fn n_tuples(&self) -> usize {
        match &self.data {
            RelationData::Unary(col) => col.len(),
            RelationData::Binary { by_first, .. } => by_first.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_tuples() == 0
    }

    /// Membership test on a unary relation.
    ///
    /// # Panics
    /// Panics on a binary relation; use [`IndexedRelation::exists_at`].
    pub fn exists(&self, v: Term) -> bool {
        match &self.data {
            RelationData::Unary(col) => col.binary_search(&v).is_ok(),
            RelationData::Binary { .. } => {
                panic!("positionless membership test on a binary relation")
            }
        }
    }

    /// Membership test on column `pos`.
    pub fn exists_at(&self, pos: usize, v: Term) -> bool {
        match &self.data {
            RelationData::Unary(col) => {
                assert_eq!(pos, 0, "column {pos} out of range for arity 1");
                col.binary_search(&v).is_ok()
            }
            RelationData::Binary {
                by_first,
                by_second,
            } => match pos {
                0 => {
                    let i = by_first.partition_point(|p| p.0 < v);
                    i < by_first.len() && by_first[i].0 == v
                }
                1 => {
                    let i = by_second.partition_point(|p| p.1 < v);
                    i < by_second.len() && by_second[i].1 == v
                }
                _ => panic!("column {pos} out of range for arity 2"),
            },
        }
    }

    /// Whether the exact pair is present (binary relations only).
    pub fn contains_pair(&self, pair: (Term, Term)) -> bool {
        self.by_first().binary_search(&pair).is_ok()
    }

    /// The sorted storage of a unary relation.
    ///
    /// # Panics
    /// Panics on a binary relation.
    pub fn single_column(&self) -> &[Term] {
        match &self.data {
            RelationData::Unary(col) => col,
            RelationData::Binary { .. } => panic!("single_column on a binary relation"),
        }
    }

    /// Pairs sorted by `(first, second)`.
    ///
    /// # Panics
    /// Panics on a unary relation.
    pub fn by_first(&self) -> &[(Term, Term)] {
        match &self.data {
            RelationData::Unary(_) => panic!("by_first on a unary relation"),
            RelationData::Binary { by_first, .. } => by_first,
        }
    }

    /// Pairs sorted by `(second, first)`.
    ///
    /// # Panics
    /// Panics on a unary relation.
    pub fn by_second(&self) -> &[(Term, Term)] {
        match &self.data {
            RelationData::Unary(_) => panic!("by_second on a unary relation"),
            RelationData::Binary { by_second, .. } => by_second,
        }
    }

    /// The number of distinct values in column `pos`. Used for cardinality
    /// estimates; linear in the column length.
    pub fn distinct_count(&self, pos: usize) -> usize {
        match &self.data {
            RelationData::Unary(col) => {
                assert_eq!(pos, 0, "column {pos} out of range for arity 1");
                count_distinct(col.iter().copied())
            }
            RelationData::Binary {
                by_first,
                by_second,
            } => match pos {
                0 => count_distinct(by_first.iter().map(|p| p.0)),
                1 => count_distinct(by_second.iter().map(|p| p.1)),
                _ => panic!("column {pos} out of range for arity 2"),
            },
        }
    }
}

fn count_distinct(sorted: impl Iterator<Item = Term>) -> usize {
    let mut count = 0;
    let mut prev = None;
    for v in sorted {
        if prev != Some(v) {
            count += 1;
            prev = Some(v);
        }
    }
    count
}
