//! Sinks for join output: per-block sharded accumulation of produced rows,
//! consolidated into an intermediate table or a fact table.

use std::sync::Arc;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::{
    common::{HashSet, Term, MAX_ARITY},
    error::{Error, Result},
    fact_table::FactTable,
    mem_iter::{TupleCursor, TupleSource},
    segment::{Column, Segment, SegmentBuilder},
};

mod assemble;

pub use assemble::SinkLayout;
use assemble::RowAssembler;

/// Rows a single block may buffer before they are folded into its merged
/// segment. Roughly 32 Mi rows, matching the memory envelope the engine was
/// tuned for.
pub const DEFAULT_MERGE_THRESHOLD: usize = 32 * 1024 * 1024;

/// How a sink guards against duplicate derivations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Keep caller-asserted-unique rows and possibly-duplicated rows in
    /// separate buffers; duplicates are resolved when buffers are merged and
    /// at consolidation.
    #[default]
    TwoBucket,
    /// Remember every row the sink has accepted and drop repeats on
    /// insertion.
    HashSet,
}

/// The capability set shared by the two join-output sinks.
///
/// Every entry point names a `blockid` choosing the shard the row lands in
/// and a `unique` flag: `true` asserts the row cannot duplicate any prior
/// row handed to this sink, `false` leaves duplicate handling to the sink.
///
/// Sinks are driven through `&mut self`; a join planner that parallelizes
/// over blocks wraps the sink in a mutex, which serializes exactly the
/// buffer-mutating sections.
pub trait JoinSink {
    /// The width of the rows this sink produces.
    fn row_size(&self) -> usize;

    /// One output row assembled from a materialized first-side row and the
    /// current position of a second-side cursor.
    fn process<S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &[Term],
        second: &S,
        unique: bool,
    );

    /// One output row assembled from the current positions of two cursors.
    fn process_pair<F: TupleSource + ?Sized, S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &F,
        second: &S,
        unique: bool,
    );

    /// One output row assembled from two groups of column vectors at the
    /// given cursor positions.
    fn process_vectors(
        &mut self,
        blockid: usize,
        first: &[&[Term]],
        i1: usize,
        second: &[&[Term]],
        i2: usize,
        unique: bool,
    );

    /// Overwrite the destination of the `idx`-th second-side mapping and emit
    /// the scratch row. The first-side values of the most recent `process`
    /// call are retained, which lets a column-materialization loop vary a
    /// single position per emitted row.
    fn process_at_pos(&mut self, blockid: usize, idx: usize, v: Term, unique: bool);

    /// Install whole columns into a block.
    fn add_columns(
        &mut self,
        blockid: usize,
        columns: &[Column],
        unique: bool,
        sorted: bool,
    ) -> Result<()>;

    /// Drain a cursor of full-width rows into a block. Not every sink
    /// supports this; the intermediate sink reports a contract error.
    fn add_columns_from_cursor(
        &mut self,
        blockid: usize,
        cursor: &mut dyn TupleCursor,
        unique: bool,
        sorted: bool,
        last_insert: bool,
    ) -> Result<()>;

    fn is_block_empty(&self, blockid: usize, unique: bool) -> bool;

    fn rows_in_block(&self, blockid: usize, unique: bool) -> usize;

    fn is_empty(&self) -> bool;

    /// Flush buffered rows. With `is_finished` the sink also produces its
    /// final artifact (an intermediate table, or fresh fact blocks).
    fn consolidate(&mut self, is_finished: bool);
}

fn parallelize_consolidation(n_blocks: usize) -> bool {
    n_blocks > 1 && rayon::current_num_threads() > 1
}

/// The concatenation of a sink's per-block segments, in block order. Rows are
/// still untrusted for duplicates across blocks; a later rule evaluation
/// treats this like any other input table.
pub struct IntermediateTable {
    row_size: usize,
    segments: Vec<Arc<Segment>>,
}

impl IntermediateTable {
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn n_rows(&self) -> usize {
        self.segments.iter().map(|s| s.n_rows()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Visit every row, segment by segment in block order.
    pub fn for_each_row(&self, mut f: impl FnMut(&[Term])) {
        for seg in &self.segments {
            seg.for_each_row(&mut f);
        }
    }
}

/// Accumulates join output destined to be re-joined by a later rule body.
///
/// Rows shard into one segment builder per block; blocks past the current
/// capacity allocate on first touch, and untouched blocks below a touched one
/// consolidate into empty segments. No deduplication happens at this stage.
pub struct IntermediateSink {
    assembler: RowAssembler,
    segments: Vec<SegmentBuilder>,
    table: Option<IntermediateTable>,
}

impl IntermediateSink {
    pub fn new(layout: &SinkLayout) -> IntermediateSink {
        IntermediateSink {
            assembler: RowAssembler::new(layout),
            segments: Vec::new(),
            table: None,
        }
    }

    fn enlarge(&mut self, new_len: usize) {
        if new_len > self.segments.len() {
            let row_size = self.assembler.row_size();
            self.segments
                .resize_with(new_len, || SegmentBuilder::new(row_size));
        }
    }

    fn insert_row(&mut self, blockid: usize) {
        self.enlarge(blockid + 1);
        if self.assembler.row_size() == 0 {
            log::debug!("added an empty row to block {blockid}");
        }
        self.segments[blockid].add_row(self.assembler.row());
    }

    /// The consolidated table, if `consolidate` has run.
    pub fn table(&self) -> Option<&IntermediateTable> {
        self.table.as_ref()
    }

    /// Hand the consolidated table to the caller.
    pub fn take_table(&mut self) -> Option<IntermediateTable> {
        self.table.take()
    }
}

impl JoinSink for IntermediateSink {
    fn row_size(&self) -> usize {
        self.assembler.row_size()
    }

    fn process<S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &[Term],
        second: &S,
        _unique: bool,
    ) {
        self.assembler.copy_first(first);
        self.assembler.copy_second(second);
        self.insert_row(blockid);
    }

    fn process_pair<F: TupleSource + ?Sized, S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &F,
        second: &S,
        _unique: bool,
    ) {
        self.assembler.copy_first_source(first);
        self.assembler.copy_second(second);
        self.insert_row(blockid);
    }

    fn process_vectors(
        &mut self,
        blockid: usize,
        first: &[&[Term]],
        i1: usize,
        second: &[&[Term]],
        i2: usize,
        _unique: bool,
    ) {
        self.assembler.copy_first_indexed(first, i1);
        self.assembler.copy_second_indexed(second, i2);
        self.insert_row(blockid);
    }

    fn process_at_pos(&mut self, blockid: usize, idx: usize, v: Term, _unique: bool) {
        self.assembler.set_second_mapping(idx, v);
        self.insert_row(blockid);
    }

    fn add_columns(
        &mut self,
        blockid: usize,
        columns: &[Column],
        _unique: bool,
        _sorted: bool,
    ) -> Result<()> {
        self.enlarge(blockid + 1);
        self.segments[blockid].add_columns(columns)
    }

    fn add_columns_from_cursor(
        &mut self,
        _blockid: usize,
        _cursor: &mut dyn TupleCursor,
        _unique: bool,
        _sorted: bool,
        _last_insert: bool,
    ) -> Result<()> {
        Err(Error::Unsupported {
            op: "cursor-driven column install on an intermediate sink",
        })
    }

    fn is_block_empty(&self, blockid: usize, _unique: bool) -> bool {
        self.segments.get(blockid).is_none_or(|s| s.is_empty())
    }

    fn rows_in_block(&self, blockid: usize, _unique: bool) -> usize {
        self.segments.get(blockid).map_or(0, |s| s.n_rows())
    }

    fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.is_empty())
    }

    fn consolidate(&mut self, _is_finished: bool) {
        let row_size = self.assembler.row_size();
        let builders = std::mem::take(&mut self.segments);
        let segments: Vec<Arc<Segment>> = builders
            .into_iter()
            .map(|b| Arc::new(b.freeze()))
            .collect();
        log::debug!(
            "intermediate consolidation produced {} segment(s)",
            segments.len()
        );
        self.table = Some(IntermediateTable { row_size, segments });
    }
}

#[derive(Default)]
struct BlockBufs {
    /// Possibly-duplicated rows, buffered until a merge folds them in.
    tmpt: Option<SegmentBuilder>,
    /// Rows the caller asserted unique.
    utmpt: Option<SegmentBuilder>,
    /// The sorted, deduplicated result of earlier merges of this block.
    merged: Option<Segment>,
}

impl BlockBufs {
    fn is_unused(&self) -> bool {
        self.tmpt.as_ref().is_none_or(|b| b.is_empty())
            && self.utmpt.as_ref().is_none_or(|b| b.is_empty())
            && self.merged.as_ref().is_none_or(|s| s.is_empty())
    }
}

/// Accumulates join output destined for a predicate's fact table.
///
/// Consolidating with `is_finished` distills each block down to the rows not
/// already derived (neither by this sink nor by any fact block visible when
/// the sink was created) and installs the survivors as new fact blocks
/// tagged with the sink's iteration.
pub struct DerivationSink<'a> {
    assembler: RowAssembler,
    table: &'a mut FactTable,
    /// Fact blocks visible to this iteration, snapshotted at construction.
    prior: Vec<Arc<Segment>>,
    iteration: usize,
    add_to_end_table: bool,
    new_derivation: bool,
    merge_threshold: usize,
    nthreads: usize,
    dedup: DedupPolicy,
    seen: HashSet<Box<[Term]>>,
    blocks: Vec<BlockBufs>,
}

impl<'a> DerivationSink<'a> {
    /// # Panics
    /// Panics if the layout's output width differs from the fact table's.
    pub fn new(
        layout: &SinkLayout,
        table: &'a mut FactTable,
        iteration: usize,
        add_to_end_table: bool,
        nthreads: usize,
        dedup: DedupPolicy,
    ) -> DerivationSink<'a> {
        assert_eq!(
            layout.row_size,
            table.row_size(),
            "sink width differs from the fact table width"
        );
        let prior = table.blocks().iter().map(|b| b.segment().clone()).collect();
        DerivationSink {
            assembler: RowAssembler::new(layout),
            table,
            prior,
            iteration,
            add_to_end_table,
            new_derivation: false,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            nthreads,
            dedup,
            seen: HashSet::default(),
            blocks: Vec::new(),
        }
    }

    /// Override [`DEFAULT_MERGE_THRESHOLD`] for tighter memory budgets.
    pub fn with_merge_threshold(mut self, threshold: usize) -> DerivationSink<'a> {
        self.merge_threshold = threshold;
        self
    }

    /// Whether the last consolidation installed at least one block.
    pub fn new_derivation(&self) -> bool {
        self.new_derivation
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn adds_to_end_table(&self) -> bool {
        self.add_to_end_table
    }

    fn enlarge(&mut self, new_len: usize) {
        if new_len > self.blocks.len() {
            self.blocks.resize_with(new_len, BlockBufs::default);
        }
    }

    fn insert_row(&mut self, blockid: usize, unique: bool) {
        self.enlarge(blockid + 1);
        let row_size = self.assembler.row_size();
        if row_size == 0 {
            log::debug!("added an empty row to block {blockid}");
        }
        match self.dedup {
            DedupPolicy::HashSet => {
                if !self.seen.insert(Box::from(self.assembler.row())) {
                    return;
                }
                let bufs = &mut self.blocks[blockid];
                bufs.tmpt
                    .get_or_insert_with(|| SegmentBuilder::new(row_size))
                    .add_row(self.assembler.row());
            }
            DedupPolicy::TwoBucket if unique => {
                let bufs = &mut self.blocks[blockid];
                bufs.utmpt
                    .get_or_insert_with(|| SegmentBuilder::new(row_size))
                    .add_row(self.assembler.row());
            }
            DedupPolicy::TwoBucket => {
                let full = self.blocks[blockid]
                    .tmpt
                    .as_ref()
                    .is_some_and(|b| b.n_rows() >= self.merge_threshold);
                if full {
                    self.merge_block(blockid);
                }
                let bufs = &mut self.blocks[blockid];
                bufs.tmpt
                    .get_or_insert_with(|| SegmentBuilder::new(row_size))
                    .add_row(self.assembler.row());
            }
        }
    }

    /// Fold the block's buffered rows into its merged segment.
    fn merge_block(&mut self, blockid: usize) {
        let bufs = &mut self.blocks[blockid];
        let Some(tmpt) = bufs.tmpt.take() else {
            return;
        };
        if tmpt.is_empty() {
            return;
        }
        log::debug!(
            "folding {} buffered row(s) of block {blockid} into its merged segment",
            tmpt.n_rows()
        );
        let sorted = tmpt.freeze().sort_unique();
        bufs.merged = Some(match bufs.merged.take() {
            Some(seg) => Segment::merge_sorted(&seg, &sorted),
            None => sorted,
        });
    }
}

/// Distill one block into the rows not derived before.
fn consolidate_block(bufs: &mut BlockBufs, prior: &[Arc<Segment>]) -> Option<Segment> {
    let unique_part = bufs.utmpt.take().map(|b| b.freeze().sort_unique());
    let combined = match (unique_part, bufs.merged.take()) {
        (Some(u), Some(m)) => Segment::merge_sorted(&u, &m),
        (Some(u), None) => u,
        (None, Some(m)) => m,
        (None, None) => return None,
    };
    let mut fresh = combined;
    for seg in prior {
        if fresh.is_empty() {
            break;
        }
        fresh = fresh.subtract_sorted(seg);
    }
    (!fresh.is_empty()).then_some(fresh)
}

impl JoinSink for DerivationSink<'_> {
    fn row_size(&self) -> usize {
        self.assembler.row_size()
    }

    fn process<S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &[Term],
        second: &S,
        unique: bool,
    ) {
        self.assembler.copy_first(first);
        self.assembler.copy_second(second);
        self.insert_row(blockid, unique);
    }

    fn process_pair<F: TupleSource + ?Sized, S: TupleSource + ?Sized>(
        &mut self,
        blockid: usize,
        first: &F,
        second: &S,
        unique: bool,
    ) {
        self.assembler.copy_first_source(first);
        self.assembler.copy_second(second);
        self.insert_row(blockid, unique);
    }

    fn process_vectors(
        &mut self,
        blockid: usize,
        first: &[&[Term]],
        i1: usize,
        second: &[&[Term]],
        i2: usize,
        unique: bool,
    ) {
        self.assembler.copy_first_indexed(first, i1);
        self.assembler.copy_second_indexed(second, i2);
        self.insert_row(blockid, unique);
    }

    fn process_at_pos(&mut self, blockid: usize, idx: usize, v: Term, unique: bool) {
        self.assembler.set_second_mapping(idx, v);
        self.insert_row(blockid, unique);
    }

    fn add_columns(
        &mut self,
        blockid: usize,
        columns: &[Column],
        unique: bool,
        _sorted: bool,
    ) -> Result<()> {
        self.enlarge(blockid + 1);
        let row_size = self.assembler.row_size();
        let bufs = &mut self.blocks[blockid];
        let target = if unique {
            bufs.utmpt
                .get_or_insert_with(|| SegmentBuilder::new(row_size))
        } else {
            bufs.tmpt
                .get_or_insert_with(|| SegmentBuilder::new(row_size))
        };
        target.add_columns(columns)
    }

    fn add_columns_from_cursor(
        &mut self,
        blockid: usize,
        cursor: &mut dyn TupleCursor,
        unique: bool,
        _sorted: bool,
        _last_insert: bool,
    ) -> Result<()> {
        let row_size = self.assembler.row_size();
        let mut scratch = SmallVec::<[Term; MAX_ARITY]>::from_elem(Term::new(0), row_size);
        while cursor.has_next() {
            cursor.next();
            for (p, slot) in scratch.iter_mut().enumerate() {
                *slot = cursor.element_at(p);
            }
            self.assembler.set_raw_row(&scratch);
            self.insert_row(blockid, unique);
        }
        Ok(())
    }

    fn is_block_empty(&self, blockid: usize, unique: bool) -> bool {
        let Some(bufs) = self.blocks.get(blockid) else {
            return true;
        };
        if unique {
            bufs.utmpt.as_ref().is_none_or(|b| b.is_empty())
        } else {
            bufs.tmpt.as_ref().is_none_or(|b| b.is_empty())
                && bufs.merged.as_ref().is_none_or(|s| s.is_empty())
        }
    }

    fn rows_in_block(&self, blockid: usize, unique: bool) -> usize {
        let Some(bufs) = self.blocks.get(blockid) else {
            return 0;
        };
        if unique {
            bufs.utmpt.as_ref().map_or(0, |b| b.n_rows())
        } else {
            bufs.tmpt.as_ref().map_or(0, |b| b.n_rows())
                + bufs.merged.as_ref().map_or(0, |s| s.n_rows())
        }
    }

    fn is_empty(&self) -> bool {
        self.blocks.iter().all(BlockBufs::is_unused)
    }

    fn consolidate(&mut self, is_finished: bool) {
        for blockid in 0..self.blocks.len() {
            self.merge_block(blockid);
        }
        if !is_finished || !self.add_to_end_table {
            return;
        }
        let prior = &self.prior;
        let blocks = &mut self.blocks;
        let results: Vec<Option<Segment>> =
            if self.nthreads > 1 && parallelize_consolidation(blocks.len()) {
                blocks
                    .par_iter_mut()
                    .map(|bufs| consolidate_block(bufs, prior))
                    .collect()
            } else {
                blocks
                    .iter_mut()
                    .map(|bufs| consolidate_block(bufs, prior))
                    .collect()
            };
        let mut installed = 0;
        for seg in results.into_iter().flatten() {
            self.table.add_block(self.iteration, Arc::new(seg));
            self.new_derivation = true;
            installed += 1;
        }
        log::debug!(
            "consolidation installed {installed} block(s) at iteration {}",
            self.iteration
        );
    }
}
