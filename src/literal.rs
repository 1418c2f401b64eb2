//! Literals: a predicate applied to a tuple of constants and variables.

use smallvec::SmallVec;

use crate::common::{PredicateId, Term, Variable, MAX_ARITY};

/// One argument position of a [`Literal`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Const(Term),
    Var(Variable),
}

impl Arg {
    pub fn is_var(&self) -> bool {
        matches!(self, Arg::Var(_))
    }

    pub fn constant(&self) -> Option<Term> {
        match self {
            Arg::Const(t) => Some(*t),
            Arg::Var(_) => None,
        }
    }

    pub fn var(&self) -> Option<Variable> {
        match self {
            Arg::Const(_) => None,
            Arg::Var(v) => Some(*v),
        }
    }
}

/// A predicate id plus an ordered tuple of arguments. The tuple length always
/// equals the predicate's arity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Literal {
    predicate: PredicateId,
    args: SmallVec<[Arg; MAX_ARITY]>,
}

impl Literal {
    /// Build a literal over `predicate`.
    ///
    /// # Panics
    /// Panics if more than [`MAX_ARITY`] arguments are supplied.
    pub fn new(predicate: PredicateId, args: impl IntoIterator<Item = Arg>) -> Literal {
        let args: SmallVec<[Arg; MAX_ARITY]> = args.into_iter().collect();
        assert!(
            args.len() <= MAX_ARITY,
            "literal arity {} exceeds the supported maximum {MAX_ARITY}",
            args.len()
        );
        Literal { predicate, args }
    }

    pub fn predicate(&self) -> PredicateId {
        self.predicate
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, pos: usize) -> Arg {
        self.args[pos]
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// The number of argument positions holding a variable.
    pub fn n_vars(&self) -> usize {
        self.args.iter().filter(|a| a.is_var()).count()
    }

    /// The number of distinct variables in the tuple.
    pub fn n_unique_vars(&self) -> usize {
        let mut seen = SmallVec::<[Variable; MAX_ARITY]>::new();
        for arg in &self.args {
            if let Arg::Var(v) = arg {
                if !seen.contains(v) {
                    seen.push(*v);
                }
            }
        }
        seen.len()
    }

    /// Whether any variable occurs at two or more positions.
    pub fn has_repeated_vars(&self) -> bool {
        self.n_vars() != self.n_unique_vars()
    }

    /// A copy of this literal with position `pos` replaced by the constant `v`.
    pub fn with_constant(&self, pos: usize, v: Term) -> Literal {
        let mut args = self.args.clone();
        args[pos] = Arg::Const(v);
        Literal {
            predicate: self.predicate,
            args,
        }
    }
}
