use super::IndexedRelation;
use crate::common::Term;

fn t(n: u64) -> Term {
    Term::new(n)
}

fn pairs(raw: &[(u64, u64)]) -> Vec<(Term, Term)> {
    raw.iter().map(|&(a, b)| (t(a), t(b))).collect()
}

#[test]
fn both_orders_agree() {
    let rel = IndexedRelation::binary(pairs(&[(3, 1), (1, 2), (2, 3), (1, 1)]));
    assert_eq!(rel.arity(), 2);
    assert_eq!(rel.n_tuples(), 4);
    assert_eq!(
        rel.by_first(),
        pairs(&[(1, 1), (1, 2), (2, 3), (3, 1)]).as_slice()
    );
    assert_eq!(
        rel.by_second(),
        pairs(&[(1, 1), (3, 1), (1, 2), (2, 3)]).as_slice()
    );
}

#[test]
fn membership_by_position() {
    let rel = IndexedRelation::binary(pairs(&[(1, 2), (2, 3), (3, 1)]));
    assert!(rel.exists_at(0, t(2)));
    assert!(!rel.exists_at(0, t(4)));
    assert!(rel.exists_at(1, t(3)));
    assert!(!rel.exists_at(1, t(4)));
    assert!(rel.contains_pair((t(2), t(3))));
    assert!(!rel.contains_pair((t(2), t(2))));
}

#[test]
fn unary_sorted_and_searchable() {
    let rel = IndexedRelation::unary(vec![t(5), t(1), t(3)]);
    assert_eq!(rel.arity(), 1);
    assert_eq!(rel.single_column(), &[t(1), t(3), t(5)]);
    assert!(rel.exists(t(3)));
    assert!(!rel.exists(t(4)));
}

#[test]
fn distinct_counts() {
    let rel = IndexedRelation::binary(pairs(&[(1, 2), (1, 3), (1, 4), (2, 4)]));
    assert_eq!(rel.distinct_count(0), 2);
    assert_eq!(rel.distinct_count(1), 3);
    assert_eq!(rel.n_tuples(), 4);
}

#[test]
fn empty_relation() {
    let rel = IndexedRelation::binary(Vec::new());
    assert!(rel.is_empty());
    assert_eq!(rel.distinct_count(0), 0);
    assert!(!rel.exists_at(0, t(1)));
}
