//! Immutable column-oriented segments and the builder that grows them.

use std::{cmp::Ordering, sync::Arc};

use smallvec::SmallVec;

use crate::{
    common::{Term, MAX_ARITY},
    error::{Error, Result},
    pool::Pooled,
};


/// A shared column of terms. Bulk installs hand whole columns across sinks
/// without copying.
pub type Column = Arc<Vec<Term>>;

/// An immutable collection of rows of fixed width, stored column-major.
///
/// Rows may contain duplicates; the sorted-set operations below state their
/// uniqueness preconditions explicitly. A segment of width zero is a
/// propositional derivation: it carries a row count and no data.
#[derive(Clone)]
pub struct Segment {
    row_size: usize,
    n_rows: usize,
    columns: Vec<Column>,
}

impl Segment {
    pub fn empty(row_size: usize) -> Segment {
        Segment {
            row_size,
            n_rows: 0,
            columns: (0..row_size).map(|_| Column::default()).collect(),
        }
    }

    /// A segment of width zero holding `n_rows` empty rows.
    pub fn propositional(n_rows: usize) -> Segment {
        Segment {
            row_size: 0,
            n_rows,
            columns: Vec::new(),
        }
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    pub fn value_at(&self, row: usize, col: usize) -> Term {
        self.columns[col][row]
    }

    /// Visit every row in storage order. The slice passed to `f` is a scratch
    /// buffer reused between rows.
    pub fn for_each_row(&self, mut f: impl FnMut(&[Term])) {
        let mut scratch = SmallVec::<[Term; MAX_ARITY]>::from_elem(Term::new(0), self.row_size);
        for i in 0..self.n_rows {
            for (c, col) in self.columns.iter().enumerate() {
                scratch[c] = col[i];
            }
            f(&scratch);
        }
    }

    fn cmp_rows(&self, i: usize, other: &Segment, j: usize) -> Ordering {
        for (ca, cb) in self.columns.iter().zip(other.columns.iter()) {
            match ca[i].cmp(&cb[j]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// The rows of this segment in ascending order with duplicates removed.
    pub fn sort_unique(&self) -> Segment {
        if self.row_size == 0 {
            return Segment::propositional(self.n_rows.min(1));
        }
        if self.n_rows <= 1 {
            return self.clone();
        }
        let mut perm: Pooled<Vec<usize>> = Pooled::get();
        perm.extend(0..self.n_rows);
        perm.sort_unstable_by(|&a, &b| self.cmp_rows(a, self, b));
        let mut kept: Pooled<Vec<usize>> = Pooled::get();
        for &i in perm.iter() {
            match kept.last() {
                Some(&prev) if self.cmp_rows(prev, self, i) == Ordering::Equal => {}
                _ => kept.push(i),
            }
        }
        let columns = self
            .columns
            .iter()
            .map(|col| Arc::new(kept.iter().map(|&i| col[i]).collect::<Vec<Term>>()))
            .collect();
        Segment {
            row_size: self.row_size,
            n_rows: kept.len(),
            columns,
        }
    }

    /// Merge two segments of equal width whose rows are each sorted and
    /// unique, producing the sorted, unique union.
    pub fn merge_sorted(a: &Segment, b: &Segment) -> Segment {
        debug_assert_eq!(a.row_size, b.row_size, "merging segments of unequal width");
        if a.row_size == 0 {
            return Segment::propositional((a.n_rows > 0 || b.n_rows > 0) as usize);
        }
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }
        let mut cols: Vec<Vec<Term>> = (0..a.row_size)
            .map(|_| Vec::with_capacity(a.n_rows + b.n_rows))
            .collect();
        let (mut i, mut j) = (0, 0);
        while i < a.n_rows && j < b.n_rows {
            match a.cmp_rows(i, b, j) {
                Ordering::Less => {
                    copy_row(&mut cols, a, i);
                    i += 1;
                }
                Ordering::Greater => {
                    copy_row(&mut cols, b, j);
                    j += 1;
                }
                Ordering::Equal => {
                    copy_row(&mut cols, a, i);
                    i += 1;
                    j += 1;
                }
            }
        }
        while i < a.n_rows {
            copy_row(&mut cols, a, i);
            i += 1;
        }
        while j < b.n_rows {
            copy_row(&mut cols, b, j);
            j += 1;
        }
        let n_rows = cols[0].len();
        Segment {
            row_size: a.row_size,
            n_rows,
            columns: cols.into_iter().map(Arc::new).collect(),
        }
    }

    /// The rows of `self` that do not occur in `other`. Both segments must be
    /// sorted and unique.
    pub fn subtract_sorted(&self, other: &Segment) -> Segment {
        if self.row_size == 0 {
            let n = if other.n_rows > 0 { 0 } else { self.n_rows.min(1) };
            return Segment::propositional(n);
        }
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        let mut cols: Vec<Vec<Term>> = (0..self.row_size).map(|_| Vec::new()).collect();
        let mut j = 0;
        for i in 0..self.n_rows {
            while j < other.n_rows && other.cmp_rows(j, self, i) == Ordering::Less {
                j += 1;
            }
            let present = j < other.n_rows && other.cmp_rows(j, self, i) == Ordering::Equal;
            if !present {
                copy_row(&mut cols, self, i);
            }
        }
        let n_rows = cols[0].len();
        Segment {
            row_size: self.row_size,
            n_rows,
            columns: cols.into_iter().map(Arc::new).collect(),
        }
    }
}

fn copy_row(cols: &mut [Vec<Term>], seg: &Segment, row: usize) {
    for (c, col) in cols.iter_mut().enumerate() {
        col.push(seg.columns[c][row]);
    }
}

enum ColumnBuf {
    Owned(Vec<Term>),
    /// A column installed wholesale; materialized into `Owned` storage on the
    /// first divergent write.
    Shared(Column),
}

impl ColumnBuf {
    fn len(&self) -> usize {
        match self {
            ColumnBuf::Owned(vec) => vec.len(),
            ColumnBuf::Shared(col) => col.len(),
        }
    }

    fn push_value(&mut self, v: Term) {
        self.materialize().push(v);
    }

    fn materialize(&mut self) -> &mut Vec<Term> {
        if let ColumnBuf::Shared(col) = self {
            let owned = col.as_ref().clone();
            *self = ColumnBuf::Owned(owned);
        }
        match self {
            ColumnBuf::Owned(vec) => vec,
            ColumnBuf::Shared(_) => unreachable!(),
        }
    }

    fn append_shared(&mut self, col: &Column) {
        match self {
            ColumnBuf::Owned(vec) if vec.is_empty() => *self = ColumnBuf::Shared(col.clone()),
            _ => self.materialize().extend_from_slice(col),
        }
    }

    fn freeze(self) -> Column {
        match self {
            ColumnBuf::Owned(vec) => Arc::new(vec),
            ColumnBuf::Shared(col) => col,
        }
    }
}

/// An append-only builder that grows into a [`Segment`].
///
/// All columns have equal length at every public observation point.
/// `freeze` consumes the builder, so writes after sealing are ruled out by
/// ownership.
pub struct SegmentBuilder {
    row_size: usize,
    n_rows: usize,
    columns: Vec<ColumnBuf>,
}

impl SegmentBuilder {
    /// # Panics
    /// Panics if `row_size` exceeds [`MAX_ARITY`].
    pub fn new(row_size: usize) -> SegmentBuilder {
        assert!(
            row_size <= MAX_ARITY,
            "segment width {row_size} exceeds the supported maximum {MAX_ARITY}"
        );
        SegmentBuilder {
            row_size,
            n_rows: 0,
            columns: (0..row_size).map(|_| ColumnBuf::Owned(Vec::new())).collect(),
        }
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Append one row. Width-zero builders count the row without storing
    /// anything.
    ///
    /// # Panics
    /// Panics if the row width does not match the builder's.
    pub fn add_row(&mut self, row: &[Term]) {
        assert_eq!(
            row.len(),
            self.row_size,
            "attempting to add a row with mismatched width"
        );
        for (col, v) in self.columns.iter_mut().zip(row) {
            col.push_value(*v);
        }
        self.n_rows += 1;
        self.debug_check();
    }

    /// Append whole columns, aligned by position. Columns from an empty
    /// builder are shared rather than copied.
    pub fn add_columns(&mut self, cols: &[Column]) -> Result<()> {
        if cols.len() != self.row_size {
            return Err(Error::SchemaMismatch {
                expected: self.row_size,
                got: cols.len(),
            });
        }
        if self.row_size == 0 {
            return Ok(());
        }
        let added = cols[0].len();
        for col in cols {
            if col.len() != added {
                return Err(Error::SchemaMismatch {
                    expected: added,
                    got: col.len(),
                });
            }
        }
        for (buf, col) in self.columns.iter_mut().zip(cols) {
            buf.append_shared(col);
        }
        self.n_rows += added;
        self.debug_check();
        Ok(())
    }

    /// Seal the builder into an immutable segment.
    pub fn freeze(self) -> Segment {
        self.debug_check();
        Segment {
            row_size: self.row_size,
            n_rows: self.n_rows,
            columns: self.columns.into_iter().map(ColumnBuf::freeze).collect(),
        }
    }

    fn debug_check(&self) {
        debug_assert!(
            self.columns.iter().all(|c| c.len() == self.n_rows),
            "column lengths diverge from the row count"
        );
    }
}
