//! Restartable cursors over indexed relations.

use crate::{common::Term, relation::IndexedRelation};


/// Read access to the current tuple of a cursor, by column position.
pub trait TupleSource {
    fn element_at(&self, pos: usize) -> Term;
}

impl TupleSource for [Term] {
    fn element_at(&self, pos: usize) -> Term {
        self[pos]
    }
}

/// A forward cursor over tuples.
///
/// `has_next` is idempotent: calling it repeatedly neither advances the
/// cursor nor changes the answer. Calling `next` when `has_next` would
/// return false is a programming error.
pub trait TupleCursor: TupleSource {
    fn has_next(&mut self) -> bool;
    fn next(&mut self);
}

enum Rows<'a> {
    One(&'a [Term]),
    Two(&'a [(Term, Term)]),
}

impl Rows<'_> {
    fn len(&self) -> usize {
        match self {
            Rows::One(col) => col.len(),
            Rows::Two(pairs) => pairs.len(),
        }
    }

    fn first_col(&self, i: usize) -> Term {
        match self {
            Rows::One(col) => col[i],
            Rows::Two(pairs) => pairs[i].0,
        }
    }

    fn columns_equal(&self, i: usize) -> bool {
        match self {
            Rows::One(_) => true,
            Rows::Two(pairs) => pairs[i].0 == pairs[i].1,
        }
    }
}

/// A cursor over a contiguous run of an [`IndexedRelation`] index.
///
/// Construction costs two binary searches and allocates nothing; the cursor
/// borrows the relation for the duration of the scan. The state machine is
/// {before-first, on-row, exhausted}: `has_next` peeks (caching its answer so
/// the scan-ahead modes stay O(1) on repeated calls) and `next` lands on the
/// row the last peek found.
pub struct MemIterator<'a> {
    rows: Rows<'a>,
    cur: usize,
    before_first: bool,
    /// Only yield rows whose two columns are equal.
    equal_fields: bool,
    /// Only yield the first row of each run sharing a first column.
    ignore_second: bool,
    ignore_allowed: bool,
    /// Cached target of the next `next` call: `Some(None)` means exhausted.
    lookahead: Option<Option<usize>>,
}

impl<'a> MemIterator<'a> {
    /// Cursor over a unary relation, optionally restricted to the run equal
    /// to `bound`.
    pub fn unary(rel: &'a IndexedRelation, bound: Option<Term>) -> MemIterator<'a> {
        let col = rel.single_column();
        let run = match bound {
            Some(v) => {
                let lo = col.partition_point(|&x| x < v);
                let hi = col.partition_point(|&x| x <= v);
                &col[lo..hi]
            }
            None => col,
        };
        MemIterator {
            rows: Rows::One(run),
            cur: 0,
            before_first: true,
            equal_fields: false,
            ignore_second: false,
            ignore_allowed: false,
            lookahead: None,
        }
    }

    /// Cursor over a binary relation.
    ///
    /// `default_sorting` selects the `(first, second)` index; otherwise the
    /// `(second, first)` index is scanned. `c1`/`c2` bind the respective
    /// column to a constant and narrow the cursor to the matching run.
    ///
    /// # Panics
    /// A bound first column requires default sorting, and a bound second
    /// column without a bound first requires the second-major order; the
    /// run boundaries are only contiguous in the matching index.
    pub fn binary(
        rel: &'a IndexedRelation,
        default_sorting: bool,
        c1: Option<Term>,
        c2: Option<Term>,
        equal_fields: bool,
    ) -> MemIterator<'a> {
        if c1.is_some() {
            assert!(
                default_sorting,
                "a bound first column requires the (first, second) sort order"
            );
        } else if c2.is_some() {
            assert!(
                !default_sorting,
                "a bound second column alone requires the (second, first) sort order"
            );
        }
        let pairs = if default_sorting {
            rel.by_first()
        } else {
            rel.by_second()
        };
        let run = match (c1, c2) {
            (Some(v1), Some(v2)) => {
                let target = (v1, v2);
                let lo = pairs.partition_point(|&p| p < target);
                let hi = pairs.partition_point(|&p| p <= target);
                &pairs[lo..hi]
            }
            (Some(v1), None) => {
                let lo = pairs.partition_point(|&p| p.0 < v1);
                let hi = pairs.partition_point(|&p| p.0 <= v1);
                &pairs[lo..hi]
            }
            (None, Some(v2)) => {
                let lo = pairs.partition_point(|&p| p.1 < v2);
                let hi = pairs.partition_point(|&p| p.1 <= v2);
                &pairs[lo..hi]
            }
            (None, None) => pairs,
        };
        let ignore_allowed = c1.is_none() && c2.is_none() && default_sorting && !equal_fields;
        MemIterator {
            rows: Rows::Two(run),
            cur: 0,
            before_first: true,
            equal_fields,
            ignore_second: false,
            ignore_allowed,
            lookahead: None,
        }
    }

    /// Project away duplicate first columns: after this, `next` skips to the
    /// next row whose first column differs from the current one.
    ///
    /// A no-op unless the cursor is an unbound default-sorted binary scan
    /// that has not yet taken a row.
    pub fn skip_duplicated_first_column(&mut self) {
        if self.ignore_allowed && self.before_first {
            self.ignore_second = true;
            self.lookahead = None;
        }
    }

    /// Return the cursor to its before-first state over the same run.
    pub fn reset(&mut self) {
        self.cur = 0;
        self.before_first = true;
        self.lookahead = None;
    }

    /// The number of rows in the run the cursor was narrowed to. In the
    /// scan-ahead modes this is an upper bound on the rows yielded.
    pub fn run_len(&self) -> usize {
        self.rows.len()
    }

    fn scan_next(&self) -> Option<usize> {
        let len = self.rows.len();
        if self.equal_fields {
            let start = if self.before_first { 0 } else { self.cur + 1 };
            (start..len).find(|&i| self.rows.columns_equal(i))
        } else if self.ignore_second && !self.before_first {
            let cur_first = self.rows.first_col(self.cur);
            (self.cur + 1..len).find(|&i| self.rows.first_col(i) != cur_first)
        } else {
            let next = if self.before_first { 0 } else { self.cur + 1 };
            (next < len).then_some(next)
        }
    }
}

impl TupleSource for MemIterator<'_> {
    /// The current row's value at `pos`. Unary cursors have a single column
    /// and ignore `pos`.
    ///
    /// # Panics
    /// Panics before the first `next`.
    fn element_at(&self, pos: usize) -> Term {
        assert!(!self.before_first, "reading a cursor before the first next");
        match &self.rows {
            Rows::One(col) => col[self.cur],
            Rows::Two(pairs) => {
                if pos == 0 {
                    pairs[self.cur].0
                } else {
                    pairs[self.cur].1
                }
            }
        }
    }
}

impl TupleCursor for MemIterator<'_> {
    fn has_next(&mut self) -> bool {
        let next = match self.lookahead {
            Some(next) => next,
            None => {
                let next = self.scan_next();
                self.lookahead = Some(next);
                next
            }
        };
        next.is_some()
    }

    fn next(&mut self) {
        let target = match self.lookahead.take() {
            Some(next) => next,
            None => self.scan_next(),
        };
        match target {
            Some(i) => {
                self.cur = i;
                self.before_first = false;
            }
            None => panic!("cursor advanced past the end of its run"),
        }
    }
}
