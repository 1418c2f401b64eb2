use super::{EdbLayer, EdbTable};
use crate::{
    common::Term,
    conf::EdbConf,
    error::{Error, Result},
    literal::{Arg, Literal},
    mem_iter::{TupleCursor, TupleSource},
    pattern::PatternQuery,
    relation::IndexedRelation,
    row_buffer::RowBuffer,
    segment::Column,
};

fn t(n: u64) -> Term {
    Term::new(n)
}

fn var(n: u32) -> Arg {
    Arg::Var(crate::common::Variable::new(n))
}

fn konst(n: u64) -> Arg {
    Arg::Const(Term::new(n))
}

fn pairs(raw: &[(u64, u64)]) -> Vec<(Term, Term)> {
    raw.iter().map(|&(a, b)| (t(a), t(b))).collect()
}

fn layer_with(raw: &[(u64, u64)]) -> (EdbLayer, crate::common::PredicateId) {
    let mut layer = EdbLayer::new();
    let id = layer.add_relation("p", IndexedRelation::binary(pairs(raw)));
    (layer, id)
}

fn run_query(
    layer: &EdbLayer,
    q: &PatternQuery,
    pos_filter: Option<&[usize]>,
    values_filter: Option<&[Term]>,
) -> Result<Vec<Vec<Term>>> {
    let mut out = RowBuffer::new(q.literal().arity());
    layer.query(q, &mut out, pos_filter, values_filter)?;
    Ok(out.iter().map(|r| r.to_vec()).collect())
}

#[test]
fn repeated_variable_filters_everything_out() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3), (3, 1)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(0)]));
    assert_eq!(run_query(&layer, &q, None, None).unwrap(), Vec::<Vec<Term>>::new());
}

#[test]
fn repeated_variable_keeps_matching_rows() {
    let (layer, id) = layer_with(&[(1, 1), (1, 2), (4, 4)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(0)]));
    assert_eq!(
        run_query(&layer, &q, None, None).unwrap(),
        vec![vec![t(1), t(1)], vec![t(4), t(4)]]
    );
}

#[test]
fn unsorted_filter_is_normalized() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3), (3, 1)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    let rows = run_query(&layer, &q, Some(&[0]), Some(&[t(3), t(1)])).unwrap();
    // Scan order of the (first, second) index.
    assert_eq!(rows, vec![vec![t(1), t(2)], vec![t(3), t(1)]]);
}

#[test]
fn filter_on_second_position_scans_the_other_index() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3), (3, 1), (5, 1)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    let rows = run_query(&layer, &q, Some(&[1]), Some(&[t(1)])).unwrap();
    assert_eq!(rows, vec![vec![t(3), t(1)], vec![t(5), t(1)]]);
}

#[test]
fn filter_emits_every_matching_row_per_value() {
    let (layer, id) = layer_with(&[(1, 2), (1, 3), (1, 4), (2, 5)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    let rows = run_query(&layer, &q, Some(&[0]), Some(&[t(1)])).unwrap();
    assert_eq!(
        rows,
        vec![vec![t(1), t(2)], vec![t(1), t(3)], vec![t(1), t(4)]]
    );
}

#[test]
fn duplicate_filter_values_do_not_duplicate_rows() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    let rows = run_query(&layer, &q, Some(&[0]), Some(&[t(1), t(1), t(1)])).unwrap();
    assert_eq!(rows, vec![vec![t(1), t(2)]]);
}

#[test]
fn filter_on_both_positions_probes_pairs() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3), (3, 1)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    let rows = run_query(
        &layer,
        &q,
        Some(&[0, 1]),
        Some(&[t(2), t(3), t(9), t(9), t(1), t(2)]),
    )
    .unwrap();
    assert_eq!(rows, vec![vec![t(1), t(2)], vec![t(2), t(3)]]);
}

#[test]
fn inverted_pair_filter_reads_second_major_pairs() {
    let (layer, id) = layer_with(&[(1, 2), (2, 3), (3, 1)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    // Pairs arrive as (value at position 1, value at position 0).
    let rows = run_query(&layer, &q, Some(&[1, 0]), Some(&[t(3), t(2), t(2), t(2)])).unwrap();
    assert_eq!(rows, vec![vec![t(2), t(3)]]);
}

#[test]
fn odd_pair_filter_fails_fast() {
    let (layer, id) = layer_with(&[(1, 2)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    match run_query(&layer, &q, Some(&[0, 1]), Some(&[t(1), t(2), t(3)])) {
        Err(Error::OddFilterLength(3)) => {}
        other => panic!("expected an odd-length error, got {other:?}"),
    }
}

#[test]
fn bad_filter_positions_are_rejected() {
    let (layer, id) = layer_with(&[(1, 2)]);
    let q = PatternQuery::new(Literal::new(id, [var(0), var(1)]));
    assert!(run_query(&layer, &q, Some(&[2]), Some(&[t(1)])).is_err());
    assert!(run_query(&layer, &q, Some(&[0, 0]), Some(&[t(1), t(2)])).is_err());
}

#[test]
fn unary_query_and_filter() {
    let mut layer = EdbLayer::new();
    let id = layer.add_relation("u", IndexedRelation::unary(vec![t(3), t(1), t(2)]));
    let q = PatternQuery::new(Literal::new(id, [var(0)]));
    assert_eq!(
        run_query(&layer, &q, None, None).unwrap(),
        vec![vec![t(1)], vec![t(2)], vec![t(3)]]
    );
    assert_eq!(
        run_query(&layer, &q, Some(&[0]), Some(&[t(2), t(9)])).unwrap(),
        vec![vec![t(2)]]
    );
    assert!(run_query(&layer, &q, Some(&[1]), Some(&[t(2)])).is_err());
}

#[test]
fn unknown_predicate_is_an_error() {
    let layer = EdbLayer::new();
    let literal = Literal::new(crate::common::PredicateId::new(42), [var(0)]);
    assert!(matches!(
        layer.cardinality(&literal),
        Err(Error::UnknownPredicate(_))
    ));
}

#[test]
fn iterator_choice_follows_bindings() {
    let (layer, id) = layer_with(&[(1, 2), (1, 3), (2, 1)]);

    let mut it = layer
        .iterator(&Literal::new(id, [konst(1), var(0)]))
        .unwrap();
    let mut rows = Vec::new();
    while it.has_next() {
        it.next();
        rows.push((it.element_at(0), it.element_at(1)));
    }
    assert_eq!(rows, vec![(t(1), t(2)), (t(1), t(3))]);

    // Binding only the second column walks the (second, first) index.
    let mut it = layer
        .iterator(&Literal::new(id, [var(0), konst(1)]))
        .unwrap();
    assert!(it.has_next());
    it.next();
    assert_eq!((it.element_at(0), it.element_at(1)), (t(2), t(1)));
    assert!(!it.has_next());
}

#[test]
fn sorted_iterator_honors_requested_order() {
    let (layer, id) = layer_with(&[(2, 1), (1, 3)]);
    let lit = Literal::new(id, [var(0), var(1)]);

    let mut it = layer.sorted_iterator(&lit, &[0, 1]).unwrap();
    it.next();
    assert_eq!(it.element_at(0), t(1));

    // Major order on the second column.
    let mut it = layer.sorted_iterator(&lit, &[1, 0]).unwrap();
    it.next();
    assert_eq!(it.element_at(1), t(1));
}

#[test]
fn iterator_with_repeated_vars_only_yields_equal_rows() {
    let (layer, id) = layer_with(&[(1, 2), (3, 3)]);
    let mut it = layer.iterator(&Literal::new(id, [var(0), var(0)])).unwrap();
    assert!(it.has_next());
    it.next();
    assert_eq!((it.element_at(0), it.element_at(1)), (t(3), t(3)));
    assert!(!it.has_next());
}

#[test]
fn cardinalities() {
    let (layer, id) = layer_with(&[(1, 2), (1, 3), (2, 3)]);
    let free = Literal::new(id, [var(0), var(1)]);
    assert_eq!(layer.cardinality(&free).unwrap(), 3);
    assert_eq!(layer.estimate_cardinality(&free).unwrap(), 3);
    assert_eq!(layer.cardinality_column(&free, 0).unwrap(), 2);
    assert_eq!(layer.cardinality_column(&free, 1).unwrap(), 2);

    let bound = Literal::new(id, [konst(1), var(0)]);
    assert_eq!(layer.cardinality(&bound).unwrap(), 2);

    // A repeated variable is an equality constraint, counted exactly.
    let repeated = Literal::new(id, [var(0), var(0)]);
    assert_eq!(layer.cardinality(&repeated).unwrap(), 0);
}

#[test]
fn emptiness_cases() {
    let (layer, id) = layer_with(&[(1, 2), (2, 2)]);
    let free = Literal::new(id, [var(0), var(1)]);
    assert!(!layer.is_empty(&free, None, None).unwrap());

    assert!(!layer
        .is_empty(&Literal::new(id, [konst(1), var(0)]), None, None)
        .unwrap());
    assert!(layer
        .is_empty(&Literal::new(id, [konst(9), var(0)]), None, None)
        .unwrap());
    assert!(!layer
        .is_empty(&Literal::new(id, [var(0), var(0)]), None, None)
        .unwrap());
    assert!(!layer
        .is_empty(&Literal::new(id, [konst(1), konst(2)]), None, None)
        .unwrap());
    assert!(layer
        .is_empty(&Literal::new(id, [konst(2), konst(1)]), None, None)
        .unwrap());

    let empty = {
        let mut layer = EdbLayer::new();
        let id = layer.add_relation("e", IndexedRelation::binary(Vec::new()));
        (layer, id)
    };
    assert!(empty
        .0
        .is_empty(&Literal::new(empty.1, [var(0), var(1)]), None, None)
        .unwrap());
    assert_eq!(
        empty
            .0
            .cardinality(&Literal::new(empty.1, [var(0), var(1)]))
            .unwrap(),
        0
    );
}

#[test]
fn emptiness_filter_is_a_disjunction_of_bindings() {
    let (layer, id) = layer_with(&[(1, 2), (2, 2)]);
    let free = Literal::new(id, [var(0), var(1)]);
    // Neither binding matches.
    assert!(layer
        .is_empty(&free, Some(&[0, 0]), Some(&[t(7), t(8)]))
        .unwrap());
    // The second binding (position 1 = 2) matches.
    assert!(!layer
        .is_empty(&free, Some(&[0, 1]), Some(&[t(7), t(2)]))
        .unwrap());
    // Misaligned filters are contract errors.
    assert!(layer.is_empty(&free, Some(&[0]), Some(&[])).is_err());
}

/// A minimal external backend over an in-memory pair list, standing in for a
/// disk- or SQL-backed table in these tests.
struct MirrorTable {
    rel: IndexedRelation,
    dict: Vec<(String, Term)>,
}

impl MirrorTable {
    fn new(raw: &[(u64, u64)], dict: &[(&str, u64)]) -> MirrorTable {
        MirrorTable {
            rel: IndexedRelation::binary(pairs(raw)),
            dict: dict.iter().map(|&(s, n)| (s.to_string(), t(n))).collect(),
        }
    }
}

impl EdbTable for MirrorTable {
    fn arity(&self) -> usize {
        2
    }

    fn query(
        &self,
        q: &PatternQuery,
        out: &mut RowBuffer,
        _pos_filter: Option<&[usize]>,
        _values_filter: Option<&[Term]>,
    ) -> Result<()> {
        for &(a, b) in self.rel.by_first() {
            let row = [a, b];
            if q.repeats_hold(&row) {
                out.add_row(&row);
            }
        }
        Ok(())
    }

    fn iterator<'a>(&'a self, literal: &Literal) -> Result<Box<dyn TupleCursor + 'a>> {
        let c1 = literal.arg(0).constant();
        Ok(Box::new(crate::mem_iter::MemIterator::binary(
            &self.rel,
            true,
            c1,
            None,
            literal.has_repeated_vars(),
        )))
    }

    fn sorted_iterator<'a>(
        &'a self,
        literal: &Literal,
        _fields: &[usize],
    ) -> Result<Box<dyn TupleCursor + 'a>> {
        self.iterator(literal)
    }

    fn cardinality(&self, _literal: &Literal) -> usize {
        self.rel.n_tuples()
    }

    fn cardinality_column(&self, _literal: &Literal, pos: usize) -> usize {
        self.rel.distinct_count(pos)
    }

    fn estimate_cardinality(&self, literal: &Literal) -> usize {
        self.cardinality(literal)
    }

    fn is_empty(
        &self,
        _literal: &Literal,
        _pos_filter: Option<&[usize]>,
        _values_filter: Option<&[Term]>,
    ) -> bool {
        self.rel.is_empty()
    }

    fn check_in(&self, values: &[Term], _literal: &Literal, pos: usize) -> Result<(Column, usize)> {
        let hits: Vec<Term> = values
            .iter()
            .copied()
            .filter(|&v| self.rel.exists_at(pos, v))
            .collect();
        let n = hits.len();
        Ok((std::sync::Arc::new(hits), n))
    }

    fn check_new_in_values(
        &self,
        _values: &[Column],
        _literal: &Literal,
        _pos: &[usize],
    ) -> Result<Vec<Column>> {
        Ok(Vec::new())
    }

    fn check_new_in_literals(
        &self,
        _l1: &Literal,
        _pos1: &[usize],
        _l2: &Literal,
        _pos2: &[usize],
    ) -> Result<Vec<Column>> {
        Ok(Vec::new())
    }

    fn dict_number(&self, text: &str) -> Option<Term> {
        self.dict
            .iter()
            .find(|(s, _)| s == text)
            .map(|&(_, id)| id)
    }

    fn dict_text(&self, id: Term) -> Option<String> {
        self.dict
            .iter()
            .find(|&&(_, v)| v == id)
            .map(|(s, _)| s.clone())
    }

    fn n_terms(&self) -> usize {
        self.dict.len()
    }
}

#[test]
fn external_backends_are_dispatched() {
    let mut layer = EdbLayer::new();
    let id = layer.add_external(
        "ext",
        "kb",
        Box::new(MirrorTable::new(&[(1, 2)], &[("alice", 1)])),
    );
    assert!(layer.is_external(id));
    assert_eq!(layer.backend_type(id), Some("kb"));
    assert_eq!(layer.arity(id), Some(2));

    let lit = Literal::new(id, [var(0), var(1)]);
    assert_eq!(layer.cardinality(&lit).unwrap(), 1);
    assert!(layer.supports_check_in(&lit));
    let (hits, n) = layer.check_in(&[t(1), t(9)], &lit, 0).unwrap();
    assert_eq!((hits.as_slice(), n), ([t(1)].as_slice(), 1));

    assert_eq!(layer.dict_number("alice"), Some(t(1)));
    assert_eq!(layer.dict_text(t(1)).as_deref(), Some("alice"));
    assert_eq!(layer.n_terms(), 1);
}

#[test]
fn check_in_is_unsupported_in_memory() {
    let (layer, id) = layer_with(&[(1, 2)]);
    let lit = Literal::new(id, [var(0), var(1)]);
    assert!(!layer.supports_check_in(&lit));
    assert!(matches!(
        layer.check_in(&[t(1)], &lit, 0),
        Err(Error::Unsupported { .. })
    ));
}

#[test]
fn conf_registration_builds_backends() {
    let conf = EdbConf::parse(
        "EDB0_predname=knows\nEDB0_type=kb\nEDB0_param0=/data/kb\n",
    )
    .unwrap();
    let mut layer = EdbLayer::new();
    layer
        .register_from_conf(&conf, |table| {
            assert_eq!(table.params, vec!["/data/kb".to_string()]);
            match table.backend_type.as_str() {
                "kb" => Ok(Box::new(MirrorTable::new(&[(1, 2)], &[]))),
                _ => Err(Error::ConfigDescriptor {
                    index: 0,
                    reason: "unknown backend type",
                }),
            }
        })
        .unwrap();
    let id = layer.predicate_id("knows");
    assert!(layer.is_external(id));
    assert_eq!(layer.predicate_name(id), Some("knows"));
}

#[test]
fn conf_registration_rejects_incomplete_descriptors() {
    let conf = EdbConf::parse("EDB0_type=kb\n").unwrap();
    let mut layer = EdbLayer::new();
    let res = layer.register_from_conf(&conf, |_| {
        Ok(Box::new(MirrorTable::new(&[], &[])) as Box<dyn EdbTable>)
    });
    assert!(matches!(res, Err(Error::ConfigDescriptor { .. })));
}
