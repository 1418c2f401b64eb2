//! The extensional-database layer: a registry from predicates to backends,
//! pattern-matched queries over in-memory relations, and dispatch of
//! everything else to external tables.

use std::sync::Arc;

use crate::{
    common::{HashMap, PredicateId, Term},
    conf::{EdbConf, TableConf},
    error::{Error, Result},
    literal::Literal,
    mem_iter::{MemIterator, TupleCursor, TupleSource},
    pattern::PatternQuery,
    pool::Pooled,
    relation::IndexedRelation,
    row_buffer::RowBuffer,
    segment::Column,
};

#[cfg(test)]
mod tests;

/// The capability set an external fact store must provide. The registry
/// forwards every request it cannot answer from an in-memory relation to one
/// of these.
pub trait EdbTable: Send + Sync {
    fn arity(&self) -> usize;

    /// Pattern-matched lookup with the same contract as [`EdbLayer::query`].
    fn query(
        &self,
        q: &PatternQuery,
        out: &mut RowBuffer,
        pos_filter: Option<&[usize]>,
        values_filter: Option<&[Term]>,
    ) -> Result<()>;

    fn iterator<'a>(&'a self, literal: &Literal) -> Result<Box<dyn TupleCursor + 'a>>;

    fn sorted_iterator<'a>(
        &'a self,
        literal: &Literal,
        fields: &[usize],
    ) -> Result<Box<dyn TupleCursor + 'a>>;

    /// Exact row count under the literal's bindings.
    fn cardinality(&self, literal: &Literal) -> usize;

    /// Distinct values in one column under the literal's bindings.
    fn cardinality_column(&self, literal: &Literal, pos: usize) -> usize;

    /// A cheap upper estimate of [`EdbTable::cardinality`].
    fn estimate_cardinality(&self, literal: &Literal) -> usize;

    fn is_empty(
        &self,
        literal: &Literal,
        pos_filter: Option<&[usize]>,
        values_filter: Option<&[Term]>,
    ) -> bool;

    /// Bulk membership: the subset of `values` present at `pos` of the
    /// literal's extension, plus its size.
    fn check_in(&self, values: &[Term], literal: &Literal, pos: usize) -> Result<(Column, usize)>;

    /// Bulk novelty: the columns of `values` rows absent from the literal's
    /// extension at the given positions.
    fn check_new_in_values(
        &self,
        values: &[Column],
        literal: &Literal,
        pos: &[usize],
    ) -> Result<Vec<Column>>;

    /// Bulk novelty between two bindings of the same predicate.
    fn check_new_in_literals(
        &self,
        l1: &Literal,
        pos1: &[usize],
        l2: &Literal,
        pos2: &[usize],
    ) -> Result<Vec<Column>>;

    fn dict_number(&self, text: &str) -> Option<Term>;
    fn dict_text(&self, id: Term) -> Option<String>;
    fn n_terms(&self) -> usize;
}

struct ExternalTable {
    backend_type: String,
    table: Box<dyn EdbTable>,
}

enum Backend {
    Mem(Arc<IndexedRelation>),
    External(ExternalTable),
}

/// A cursor handed out by the registry: a stack-allocated relation cursor, or
/// a boxed cursor from an external backend.
pub enum EdbIterator<'a> {
    Mem(MemIterator<'a>),
    External(Box<dyn TupleCursor + 'a>),
}

impl EdbIterator<'_> {
    /// See [`MemIterator::skip_duplicated_first_column`]. External cursors
    /// ignore the request.
    pub fn skip_duplicated_first_column(&mut self) {
        if let EdbIterator::Mem(it) = self {
            it.skip_duplicated_first_column();
        }
    }
}

impl TupleSource for EdbIterator<'_> {
    fn element_at(&self, pos: usize) -> Term {
        match self {
            EdbIterator::Mem(it) => it.element_at(pos),
            EdbIterator::External(it) => it.element_at(pos),
        }
    }
}

impl TupleCursor for EdbIterator<'_> {
    fn has_next(&mut self) -> bool {
        match self {
            EdbIterator::Mem(it) => it.has_next(),
            EdbIterator::External(it) => it.has_next(),
        }
    }

    fn next(&mut self) {
        match self {
            EdbIterator::Mem(it) => it.next(),
            EdbIterator::External(it) => it.next(),
        }
    }
}

/// The registry mapping each predicate to the backend that stores its facts.
#[derive(Default)]
pub struct EdbLayer {
    names: Vec<String>,
    ids: HashMap<String, PredicateId>,
    /// Backend per predicate id; predicates without registered facts hold
    /// `None`.
    backends: Vec<Option<Backend>>,
    /// External predicates in registration order; dictionary lookups go to
    /// the first one.
    external_order: Vec<PredicateId>,
}

impl EdbLayer {
    pub fn new() -> EdbLayer {
        EdbLayer::default()
    }

    /// Look up or allocate the id for a predicate name.
    pub fn predicate_id(&mut self, name: &str) -> PredicateId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = PredicateId::from_usize(self.names.len());
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn predicate_name(&self, id: PredicateId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    fn install(&mut self, id: PredicateId, backend: Backend) {
        if self.backends.len() <= id.index() {
            self.backends.resize_with(id.index() + 1, || None);
        }
        self.backends[id.index()] = Some(backend);
    }

    /// Register an in-memory relation for `name`, replacing any previous
    /// backend for it.
    pub fn add_relation(&mut self, name: &str, rel: IndexedRelation) -> PredicateId {
        let id = self.predicate_id(name);
        self.install(id, Backend::Mem(Arc::new(rel)));
        id
    }

    /// Register an external table for `name`.
    pub fn add_external(
        &mut self,
        name: &str,
        backend_type: &str,
        table: Box<dyn EdbTable>,
    ) -> PredicateId {
        let id = self.predicate_id(name);
        self.install(
            id,
            Backend::External(ExternalTable {
                backend_type: backend_type.to_string(),
                table,
            }),
        );
        if !self.external_order.contains(&id) {
            self.external_order.push(id);
        }
        id
    }

    /// Register every descriptor of a parsed configuration, constructing the
    /// backends through `factory` (which fails on unknown backend types).
    pub fn register_from_conf(
        &mut self,
        conf: &EdbConf,
        mut factory: impl FnMut(&TableConf) -> Result<Box<dyn EdbTable>>,
    ) -> Result<()> {
        for (index, table) in conf.tables().iter().enumerate() {
            if table.predname.is_empty() {
                return Err(Error::ConfigDescriptor {
                    index,
                    reason: "missing predname",
                });
            }
            if table.backend_type.is_empty() {
                return Err(Error::ConfigDescriptor {
                    index,
                    reason: "missing type",
                });
            }
            let backend = factory(table)?;
            let id = self.add_external(&table.predname, &table.backend_type, backend);
            log::debug!(
                "registered {} as predicate {id:?} (backend type {})",
                table.predname,
                table.backend_type
            );
        }
        Ok(())
    }

    fn lookup(&self, pred: PredicateId) -> Option<&Backend> {
        self.backends.get(pred.index())?.as_ref()
    }

    /// The in-memory relation backing `pred`, when there is one.
    pub fn relation(&self, pred: PredicateId) -> Option<&Arc<IndexedRelation>> {
        match self.lookup(pred) {
            Some(Backend::Mem(rel)) => Some(rel),
            _ => None,
        }
    }

    pub fn is_external(&self, pred: PredicateId) -> bool {
        matches!(self.lookup(pred), Some(Backend::External(_)))
    }

    /// The backend type string an external predicate was registered with.
    pub fn backend_type(&self, pred: PredicateId) -> Option<&str> {
        match self.lookup(pred) {
            Some(Backend::External(ext)) => Some(&ext.backend_type),
            _ => None,
        }
    }

    pub fn arity(&self, pred: PredicateId) -> Option<usize> {
        match self.lookup(pred)? {
            Backend::Mem(rel) => Some(rel.arity()),
            Backend::External(ext) => Some(ext.table.arity()),
        }
    }

    fn backend(&self, pred: PredicateId) -> Result<&Backend> {
        self.lookup(pred).ok_or(Error::UnknownPredicate(pred))
    }

    /// Answer a pattern-matched lookup into `out`.
    ///
    /// With no filter, every row matching the literal's constants and
    /// repeated variables is emitted in the scan order of the `(first,
    /// second)` index. A filter names positions and, aligned with them, the
    /// values those positions may take; filter values are deduplicated and
    /// sorted before a merge against the matching index. A filter on both
    /// positions reads `values_filter` as alternating pairs and requires an
    /// even number of values.
    pub fn query(
        &self,
        q: &PatternQuery,
        out: &mut RowBuffer,
        pos_filter: Option<&[usize]>,
        values_filter: Option<&[Term]>,
    ) -> Result<()> {
        let pred = q.literal().predicate();
        log::trace!("edb query on predicate {pred:?}");
        match self.backend(pred)? {
            Backend::External(ext) => ext.table.query(q, out, pos_filter, values_filter),
            // In-memory relations only exist at arity 1 or 2; anything wider
            // must come from an external backend.
            Backend::Mem(rel) => match rel.arity() {
                1 => query_unary(rel, out, pos_filter, values_filter),
                _ => query_binary(rel, q, out, pos_filter, values_filter),
            },
        }
    }

    /// A cursor over the literal's matches, in no particular order.
    pub fn iterator(&self, literal: &Literal) -> Result<EdbIterator<'_>> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(EdbIterator::External(ext.table.iterator(literal)?)),
            Backend::Mem(rel) => Ok(EdbIterator::Mem(mem_iterator(rel, literal, None))),
        }
    }

    /// A cursor over the literal's matches honoring a requested column
    /// order: `fields` lists the columns major-first.
    pub fn sorted_iterator(
        &self,
        literal: &Literal,
        fields: &[usize],
    ) -> Result<EdbIterator<'_>> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(EdbIterator::External(
                ext.table.sorted_iterator(literal, fields)?,
            )),
            Backend::Mem(rel) => Ok(EdbIterator::Mem(mem_iterator(rel, literal, Some(fields)))),
        }
    }

    /// Exact number of rows matching the literal.
    pub fn cardinality(&self, literal: &Literal) -> Result<usize> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(ext.table.cardinality(literal)),
            Backend::Mem(rel) => {
                if literal.n_vars() == literal.arity() && !literal.has_repeated_vars() {
                    return Ok(rel.n_tuples());
                }
                let mut it = mem_iterator(rel, literal, None);
                let mut count = 0;
                while it.has_next() {
                    it.next();
                    count += 1;
                }
                Ok(count)
            }
        }
    }

    /// Cheap estimate: the full extension size for in-memory relations.
    pub fn estimate_cardinality(&self, literal: &Literal) -> Result<usize> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(ext.table.estimate_cardinality(literal)),
            Backend::Mem(rel) => Ok(rel.n_tuples()),
        }
    }

    /// Distinct values in one column of the literal's extension.
    pub fn cardinality_column(&self, literal: &Literal, pos: usize) -> Result<usize> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(ext.table.cardinality_column(literal, pos)),
            Backend::Mem(rel) => Ok(rel.distinct_count(pos)),
        }
    }

    /// Short-circuit emptiness test. `pos_filter`/`values_filter` pair up
    /// into candidate bindings of the literal, tried one at a time; the
    /// result is true only if every binding (or the bare literal, with no
    /// filter) matches nothing.
    pub fn is_empty(
        &self,
        literal: &Literal,
        pos_filter: Option<&[usize]>,
        values_filter: Option<&[Term]>,
    ) -> Result<bool> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => Ok(ext.table.is_empty(literal, pos_filter, values_filter)),
            Backend::Mem(rel) => {
                let Some(positions) = pos_filter else {
                    return mem_literal_is_empty(rel, literal);
                };
                let values = values_filter.unwrap_or(&[]);
                if positions.len() != values.len()
                    || positions.iter().any(|&p| p >= literal.arity())
                {
                    return Err(Error::BadFilter {
                        positions: positions.to_vec(),
                        arity: literal.arity(),
                    });
                }
                for (&p, &v) in positions.iter().zip(values) {
                    if !mem_literal_is_empty(rel, &literal.with_constant(p, v))? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Whether bulk membership tests can be pushed down for this literal.
    pub fn supports_check_in(&self, literal: &Literal) -> bool {
        self.is_external(literal.predicate())
    }

    /// See [`EdbTable::check_in`]. In-memory relations do not support the
    /// bulk path.
    pub fn check_in(
        &self,
        values: &[Term],
        literal: &Literal,
        pos: usize,
    ) -> Result<(Column, usize)> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => ext.table.check_in(values, literal, pos),
            Backend::Mem(_) => Err(Error::Unsupported {
                op: "bulk membership test on an in-memory relation",
            }),
        }
    }

    /// See [`EdbTable::check_new_in_values`].
    pub fn check_new_in_values(
        &self,
        values: &[Column],
        literal: &Literal,
        pos: &[usize],
    ) -> Result<Vec<Column>> {
        match self.backend(literal.predicate())? {
            Backend::External(ext) => ext.table.check_new_in_values(values, literal, pos),
            Backend::Mem(_) => Err(Error::Unsupported {
                op: "bulk novelty test on an in-memory relation",
            }),
        }
    }

    /// See [`EdbTable::check_new_in_literals`]. Both literals must name the
    /// same external predicate.
    pub fn check_new_in_literals(
        &self,
        l1: &Literal,
        pos1: &[usize],
        l2: &Literal,
        pos2: &[usize],
    ) -> Result<Vec<Column>> {
        if l1.predicate() != l2.predicate() {
            return Err(Error::Unsupported {
                op: "bulk novelty test across distinct predicates",
            });
        }
        match self.backend(l1.predicate())? {
            Backend::External(ext) => ext.table.check_new_in_literals(l1, pos1, l2, pos2),
            Backend::Mem(_) => Err(Error::Unsupported {
                op: "bulk novelty test on an in-memory relation",
            }),
        }
    }

    fn first_external(&self) -> Option<&dyn EdbTable> {
        let id = *self.external_order.first()?;
        match self.lookup(id) {
            Some(Backend::External(ext)) => Some(ext.table.as_ref()),
            _ => None,
        }
    }

    /// Dictionary lookup, delegated to the first registered external table.
    pub fn dict_number(&self, text: &str) -> Option<Term> {
        self.first_external()?.dict_number(text)
    }

    /// Reverse dictionary lookup, delegated like [`EdbLayer::dict_number`].
    pub fn dict_text(&self, id: Term) -> Option<String> {
        self.first_external()?.dict_text(id)
    }

    pub fn n_terms(&self) -> usize {
        self.first_external().map_or(0, |table| table.n_terms())
    }
}

/// Build the cursor for a literal over an in-memory relation. `fields`
/// carries the requested sort order when the caller asked for one.
fn mem_iterator<'a>(
    rel: &'a IndexedRelation,
    literal: &Literal,
    fields: Option<&[usize]>,
) -> MemIterator<'a> {
    debug_assert_eq!(
        literal.arity(),
        rel.arity(),
        "literal arity differs from the relation's"
    );
    let c1 = literal.arg(0).constant();
    match rel.arity() {
        1 => MemIterator::unary(rel, c1),
        _ => {
            let c2 = literal.arg(1).constant();
            let equal_fields = literal.has_repeated_vars();
            let default_sorting = if c1.is_some() {
                true
            } else if c2.is_some() {
                false
            } else {
                match fields {
                    // An unconstrained unsorted scan reads the (first,
                    // second) index.
                    None => true,
                    Some(fs) => !fs.is_empty() && fs[0] == 0,
                }
            };
            MemIterator::binary(rel, default_sorting, c1, c2, equal_fields)
        }
    }
}

fn query_unary(
    rel: &IndexedRelation,
    out: &mut RowBuffer,
    pos_filter: Option<&[usize]>,
    values_filter: Option<&[Term]>,
) -> Result<()> {
    match pos_filter {
        None => {
            for &t in rel.single_column() {
                out.add_row(&[t]);
            }
            Ok(())
        }
        Some(positions) => {
            if positions.len() != 1 || positions[0] != 0 {
                return Err(Error::BadFilter {
                    positions: positions.to_vec(),
                    arity: 1,
                });
            }
            for &v in values_filter.unwrap_or(&[]) {
                if rel.exists(v) {
                    out.add_row(&[v]);
                }
            }
            Ok(())
        }
    }
}

fn query_binary(
    rel: &IndexedRelation,
    q: &PatternQuery,
    out: &mut RowBuffer,
    pos_filter: Option<&[usize]>,
    values_filter: Option<&[Term]>,
) -> Result<()> {
    match pos_filter {
        None | Some(&[]) => {
            for &(a, b) in rel.by_first() {
                let row = [a, b];
                if q.repeats_hold(&row) {
                    out.add_row(&row);
                }
            }
            Ok(())
        }
        Some(&[p]) => {
            if p > 1 {
                return Err(Error::BadFilter {
                    positions: vec![p],
                    arity: 2,
                });
            }
            let filters = normalize_filter_values(values_filter.unwrap_or(&[]));
            if p == 0 {
                merge_filtered(rel.by_first(), 0, &filters, q, out);
            } else {
                merge_filtered(rel.by_second(), 1, &filters, q, out);
            }
            Ok(())
        }
        Some(&[p0, p1]) => {
            if p0 > 1 || p1 > 1 || p0 == p1 {
                return Err(Error::BadFilter {
                    positions: vec![p0, p1],
                    arity: 2,
                });
            }
            let raw = values_filter.unwrap_or(&[]);
            if raw.len() % 2 != 0 {
                return Err(Error::OddFilterLength(raw.len()));
            }
            let filters = normalize_filter_pairs(raw);
            let inverted = p0 != 0;
            for &(a, b) in filters.iter() {
                // Probe the index whose sort order matches the pair layout:
                // (first, second) pairs against by_first, (second, first)
                // pairs against by_second.
                let (row, hit) = if !inverted {
                    ([a, b], rel.by_first().binary_search(&(a, b)).is_ok())
                } else {
                    (
                        [b, a],
                        rel.by_second()
                            .binary_search_by(|pair| (pair.1, pair.0).cmp(&(a, b)))
                            .is_ok(),
                    )
                };
                if hit && q.repeats_hold(&row) {
                    out.add_row(&row);
                }
            }
            Ok(())
        }
        Some(positions) => Err(Error::BadFilter {
            positions: positions.to_vec(),
            arity: 2,
        }),
    }
}

/// Drop consecutive duplicates and establish ascending order; the merge in
/// [`merge_filtered`] depends on both.
fn normalize_filter_values(values: &[Term]) -> Pooled<Vec<Term>> {
    let mut out: Pooled<Vec<Term>> = Pooled::get();
    let mut sorted = true;
    let mut iter = values.iter().copied();
    if let Some(first) = iter.next() {
        let mut prev = first;
        out.push(first);
        for v in iter {
            if v < prev {
                sorted = false;
                out.push(v);
            } else if v > prev {
                out.push(v);
            }
            prev = v;
        }
    }
    if !sorted {
        out.sort_unstable();
    }
    out
}

fn normalize_filter_pairs(raw: &[Term]) -> Pooled<Vec<(Term, Term)>> {
    let mut out: Pooled<Vec<(Term, Term)>> = Pooled::get();
    for chunk in raw.chunks_exact(2) {
        let pair = (chunk[0], chunk[1]);
        if out.last() != Some(&pair) {
            out.push(pair);
        }
    }
    if !out.windows(2).all(|w| w[0] <= w[1]) {
        out.sort_unstable();
    }
    out
}

/// Sorted merge of one relation index against ascending filter values. On a
/// match only the relation cursor advances, so every row matching the
/// current filter value is emitted before the filter moves on.
fn merge_filtered(
    pairs: &[(Term, Term)],
    key_pos: usize,
    filters: &[Term],
    q: &PatternQuery,
    out: &mut RowBuffer,
) {
    let key = |p: (Term, Term)| if key_pos == 0 { p.0 } else { p.1 };
    let (mut i, mut j) = (0, 0);
    while i < pairs.len() && j < filters.len() {
        while i < pairs.len() && key(pairs[i]) < filters[j] {
            i += 1;
        }
        if i == pairs.len() {
            break;
        }
        while j < filters.len() && key(pairs[i]) > filters[j] {
            j += 1;
        }
        if j == filters.len() {
            break;
        }
        if key(pairs[i]) == filters[j] {
            let row = [pairs[i].0, pairs[i].1];
            if q.repeats_hold(&row) {
                out.add_row(&row);
            }
        }
        i += 1;
    }
}

fn mem_literal_is_empty(rel: &IndexedRelation, literal: &Literal) -> Result<bool> {
    let arity = literal.arity();
    let unique_vars = literal.n_unique_vars();
    if unique_vars == arity {
        return Ok(rel.n_tuples() == 0);
    }
    if unique_vars + 1 == arity {
        // One slot is either a constant or a second occurrence of the
        // literal's single variable.
        let constant = literal
            .args()
            .iter()
            .enumerate()
            .find_map(|(i, a)| a.constant().map(|v| (i, v)));
        if let Some((pos, v)) = constant {
            return Ok(!rel.exists_at(pos, v));
        }
        return Ok(!rel.by_first().iter().any(|p| p.0 == p.1));
    }
    // No variables remain: arity 2 with both positions constant.
    match (literal.arg(0).constant(), literal.arg(1).constant()) {
        (Some(a), Some(b)) => Ok(!rel.contains_pair((a, b))),
        _ => Err(Error::Unsupported {
            op: "emptiness test on this binding pattern",
        }),
    }
}
