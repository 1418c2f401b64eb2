//! Assembly of output rows from the two sides of a join.

use smallvec::SmallVec;

use crate::{
    common::{Term, MAX_ARITY},
    mem_iter::TupleSource,
};

/// The shape of the rows a sink produces: output width plus the
/// `(source, destination)` position mappings for each join side.
#[derive(Clone, Debug, Default)]
pub struct SinkLayout {
    pub row_size: usize,
    pub pos_from_first: Vec<(usize, usize)>,
    pub pos_from_second: Vec<(usize, usize)>,
}

/// The scratch row shared by every `process` entry point, plus the mappings
/// that fill it. The first-side values persist across calls, which is what
/// the position-targeted fast path relies on.
pub(crate) struct RowAssembler {
    row_size: usize,
    pos_from_first: SmallVec<[(usize, usize); MAX_ARITY]>,
    pos_from_second: SmallVec<[(usize, usize); MAX_ARITY]>,
    row: SmallVec<[Term; MAX_ARITY]>,
}

impl RowAssembler {
    /// # Panics
    /// Panics when the layout exceeds [`MAX_ARITY`] mappings or width, or
    /// when a destination lies outside the output row.
    pub(crate) fn new(layout: &SinkLayout) -> RowAssembler {
        assert!(
            layout.row_size <= MAX_ARITY,
            "output width {} exceeds the supported maximum {MAX_ARITY}",
            layout.row_size
        );
        assert!(
            layout.pos_from_first.len() + layout.pos_from_second.len() <= MAX_ARITY,
            "too many output mappings"
        );
        for &(_, dst) in layout.pos_from_first.iter().chain(&layout.pos_from_second) {
            assert!(
                dst < layout.row_size,
                "mapping destination {dst} outside the output row"
            );
        }
        RowAssembler {
            row_size: layout.row_size,
            pos_from_first: layout.pos_from_first.iter().copied().collect(),
            pos_from_second: layout.pos_from_second.iter().copied().collect(),
            row: SmallVec::from_elem(Term::new(0), layout.row_size),
        }
    }

    pub(crate) fn row_size(&self) -> usize {
        self.row_size
    }

    pub(crate) fn row(&self) -> &[Term] {
        &self.row
    }

    pub(crate) fn copy_first(&mut self, first: &[Term]) {
        for &(src, dst) in &self.pos_from_first {
            self.row[dst] = first[src];
        }
    }

    pub(crate) fn copy_first_source<S: TupleSource + ?Sized>(&mut self, first: &S) {
        for &(src, dst) in &self.pos_from_first {
            self.row[dst] = first.element_at(src);
        }
    }

    pub(crate) fn copy_second<S: TupleSource + ?Sized>(&mut self, second: &S) {
        for &(src, dst) in &self.pos_from_second {
            self.row[dst] = second.element_at(src);
        }
    }

    pub(crate) fn copy_first_indexed(&mut self, cols: &[&[Term]], i: usize) {
        for &(src, dst) in &self.pos_from_first {
            self.row[dst] = cols[src][i];
        }
    }

    pub(crate) fn copy_second_indexed(&mut self, cols: &[&[Term]], i: usize) {
        for &(src, dst) in &self.pos_from_second {
            self.row[dst] = cols[src][i];
        }
    }

    /// Overwrite the destination of the `idx`-th second-side mapping,
    /// keeping everything else in the scratch row.
    pub(crate) fn set_second_mapping(&mut self, idx: usize, v: Term) {
        let (_, dst) = self.pos_from_second[idx];
        self.row[dst] = v;
    }

    /// Replace the whole scratch row.
    ///
    /// # Panics
    /// Panics on a width mismatch.
    pub(crate) fn set_raw_row(&mut self, row: &[Term]) {
        assert_eq!(row.len(), self.row_size, "raw row width mismatch");
        self.row.copy_from_slice(row);
    }
}
