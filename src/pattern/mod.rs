//! Query descriptors: the projection and equality constraints of a literal.

use smallvec::SmallVec;

use crate::{
    common::{Term, Variable, MAX_ARITY},
    literal::{Arg, Literal},
};


/// Positions to project and variable-equality constraints, precomputed from a
/// literal in a single pass. Immutable once built.
#[derive(Clone, Debug)]
pub struct PatternQuery {
    literal: Literal,
    /// Variable-bearing positions, in tuple order. These define the projected
    /// schema of the query's answers.
    pos_to_copy: SmallVec<[usize; MAX_ARITY]>,
    /// Pairs `(i, j)` with `i < j` where the same variable occurs at both
    /// positions; matching rows must agree on them.
    repeated_vars: SmallVec<[(usize, usize); MAX_ARITY]>,
}

impl PatternQuery {
    pub fn new(literal: Literal) -> PatternQuery {
        let mut pos_to_copy = SmallVec::new();
        let mut repeated_vars = SmallVec::new();
        let mut first_occurrence = SmallVec::<[(Variable, usize); MAX_ARITY]>::new();
        for (pos, arg) in literal.args().iter().enumerate() {
            let Arg::Var(v) = arg else { continue };
            pos_to_copy.push(pos);
            match first_occurrence.iter().find(|(seen, _)| seen == v) {
                Some((_, first_pos)) => repeated_vars.push((*first_pos, pos)),
                None => first_occurrence.push((*v, pos)),
            }
        }
        PatternQuery {
            literal,
            pos_to_copy,
            repeated_vars,
        }
    }

    pub fn literal(&self) -> &Literal {
        &self.literal
    }

    pub fn pos_to_copy(&self) -> &[usize] {
        &self.pos_to_copy
    }

    pub fn repeated_vars(&self) -> &[(usize, usize)] {
        &self.repeated_vars
    }

    /// Whether `row` satisfies every repeated-variable equality.
    pub fn repeats_hold(&self, row: &[Term]) -> bool {
        self.repeated_vars.iter().all(|&(i, j)| row[i] == row[j])
    }
}
