//! The materialization core of a bottom-up Datalog engine.
//!
//! This crate covers the path from extensional facts to derived facts: an
//! indexed in-memory relation with two sort orders, a pattern-matched query
//! layer over it (and over external backends), restartable cursors, and the
//! sinks that accumulate join output into per-block column segments before
//! consolidating them into a fact table.
//!
//! Rule scheduling, the seminaive driver loop, and the term dictionary live
//! above this crate; they only consume the interfaces exported here.

pub(crate) mod common;
pub(crate) mod conf;
pub(crate) mod edb;
pub(crate) mod error;
pub(crate) mod fact_table;
pub(crate) mod literal;
pub(crate) mod mem_iter;
pub(crate) mod pattern;
pub(crate) mod pool;
pub(crate) mod relation;
pub(crate) mod row_buffer;
pub(crate) mod segment;
pub(crate) mod sink;


pub use common::{PredicateId, Term, Variable, MAX_ARITY};
pub use conf::{EdbConf, TableConf};
pub use edb::{EdbIterator, EdbLayer, EdbTable};
pub use error::{Error, Result};
pub use fact_table::{FactBlock, FactTable};
pub use literal::{Arg, Literal};
pub use mem_iter::{MemIterator, TupleCursor, TupleSource};
pub use pattern::PatternQuery;
pub use relation::IndexedRelation;
pub use row_buffer::RowBuffer;
pub use segment::{Column, Segment, SegmentBuilder};
pub use sink::{
    DedupPolicy, DerivationSink, IntermediateSink, IntermediateTable, JoinSink, SinkLayout,
    DEFAULT_MERGE_THRESHOLD,
};
