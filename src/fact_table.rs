//! The materialized extension of a derived predicate.

use std::sync::Arc;

use crate::segment::Segment;

/// One iteration's worth of derivations: a segment tagged with the rule
/// iteration that produced it.
///
/// Blocks installed by consolidation hold sorted, duplicate-free segments;
/// the final sink relies on that to subtract prior derivations with a single
/// merge pass.
#[derive(Clone)]
pub struct FactBlock {
    iteration: usize,
    segment: Arc<Segment>,
}

impl FactBlock {
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }
}

/// An append-only, ordered list of [`FactBlock`]s for one predicate.
pub struct FactTable {
    row_size: usize,
    blocks: Vec<FactBlock>,
}

impl FactTable {
    pub fn new(row_size: usize) -> FactTable {
        FactTable {
            row_size,
            blocks: Vec::new(),
        }
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn blocks(&self) -> &[FactBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.segment.is_empty())
    }

    /// Total rows across all blocks.
    pub fn n_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.segment.n_rows()).sum()
    }

    /// Append a block for `iteration`. The segment must be sorted and free of
    /// duplicates, and must not repeat rows from earlier blocks; consolidation
    /// guarantees both.
    ///
    /// # Panics
    /// Panics if the segment width does not match the table's.
    pub fn add_block(&mut self, iteration: usize, segment: Arc<Segment>) {
        assert_eq!(
            segment.row_size(),
            self.row_size,
            "attempting to install a block with mismatched width"
        );
        self.blocks.push(FactBlock { iteration, segment });
    }
}
