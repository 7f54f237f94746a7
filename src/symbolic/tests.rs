use proptest::prelude::*;
use rustc_hash::FxHashMap;

use super::*;
use crate::error::Error;

fn names(symbol: Symbol) -> String {
    match symbol {
        Symbol::Dim(i) => format!("d{i}"),
        Symbol::Param(i) => format!("s{i}"),
    }
}

#[test]
fn test_constant_folding() {
    let mut arena = ExprArena::new();
    let a = arena.constant(3);
    let b = arena.constant(4);
    let sum = arena.add(a, b);
    assert_eq!(arena.as_constant(sum), Some(7));
    let d0 = arena.dim(0);
    let x = arena.linear([(d0, 1), (d0, 2), (d0, -3)], 5);
    assert_eq!(arena.as_constant(x), Some(5));
}

#[test]
fn test_structural_equality_is_id_equality() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);
    let a = arena.linear([(d1, 3), (d0, 2)], 1);
    let b = arena.linear([(d0, 1), (d1, 3), (d0, 1)], 1);
    assert_eq!(a, b);
    assert_eq!(arena.render(a, &names), "d0 * 2 + d1 * 3 + 1");
}

#[test]
fn test_floor_div_normalization() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);

    // gcd extraction, then the divisible term is split out
    let x = arena.linear([(d0, 4), (d1, 8)], 0);
    let div = arena.floor_div(x, 8).unwrap();
    let half = arena.floor_div(d0, 2).unwrap();
    assert_eq!(div, arena.linear([(d1, 1), (half, 1)], 0));

    // nested divisions merge
    let inner = arena.floor_div(d0, 3).unwrap();
    let outer = arena.floor_div(inner, 4).unwrap();
    assert_eq!(outer, arena.floor_div(d0, 12).unwrap());

    // constant quotient is pulled out
    let x = arena.add_constant(d0, 9);
    let div = arena.floor_div(x, 4).unwrap();
    let rest = arena.add_constant(d0, 1);
    let rest = arena.floor_div(rest, 4).unwrap();
    assert_eq!(div, arena.add_constant(rest, 2));
}

#[test]
fn test_modulo_normalization() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);

    let m12 = arena.modulo(d0, 12).unwrap();
    assert_eq!(arena.modulo(m12, 4).unwrap(), arena.modulo(d0, 4).unwrap());
    let m4 = arena.modulo(d0, 4).unwrap();
    assert_ne!(arena.modulo(m4, 12).unwrap(), m4);

    let x = arena.linear([(d0, 1), (d1, 8)], 6);
    let reduced = arena.add_constant(d0, 2);
    assert_eq!(arena.modulo(x, 4).unwrap(), arena.modulo(reduced, 4).unwrap());

    let x = arena.mul(d0, 6);
    let m = arena.modulo(x, 4).unwrap();
    assert_eq!(arena.render(m, &names), "((d0 * 3) mod 2) * 2");
}

#[test]
fn test_div_mod_recombination() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let q = arena.floor_div(d0, 4).unwrap();
    let r = arena.modulo(d0, 4).unwrap();
    assert_eq!(arena.linear([(q, 4), (r, 1)], 0), d0);

    // Re-linearizing a three dimensional decomposition gives back the linear index
    let d1 = arena.dim(1);
    let linear = arena.linear([(d0, 1), (d1, 128)], 0);
    let o0 = arena.floor_div(linear, 600).unwrap();
    let o1 = arena.floor_div(linear, 30).unwrap();
    let o1 = arena.modulo(o1, 20).unwrap();
    let o2 = arena.modulo(linear, 30).unwrap();
    assert_eq!(arena.linear([(o0, 600), (o1, 30), (o2, 1)], 0), linear);
}

#[test]
fn test_non_positive_divisor() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    assert!(matches!(
        arena.floor_div(d0, 0),
        Err(Error::MalformedExpression(_))
    ));
    assert!(matches!(
        arena.modulo(d0, -3),
        Err(Error::MalformedExpression(_))
    ));
}

#[test]
fn test_range_simplification() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);
    let s0 = arena.param(0);
    let dims = [Interval::extent(20), Interval::point(0)];
    let params = [Interval::extent(4)];
    let ranges = RangeContext::new(&dims, &params, &[]);

    let m = arena.modulo(d0, 20).unwrap();
    assert_eq!(arena.simplify(m, &ranges), d0);
    let q = arena.floor_div(d0, 20).unwrap();
    let q = arena.simplify(q, &ranges);
    assert_eq!(arena.as_constant(q), Some(0));
    let fixed = arena.simplify(d1, &ranges);
    assert_eq!(arena.as_constant(fixed), Some(0));

    let x = arena.linear([(d0, 4), (s0, 1)], 0);
    let q = arena.floor_div(x, 4).unwrap();
    assert_eq!(arena.simplify(q, &ranges), d0);
    let r = arena.modulo(x, 4).unwrap();
    assert_eq!(arena.simplify(r, &ranges), s0);
}

#[test]
fn test_constraint_aware_simplification() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);
    let linear = arena.linear([(d0, 1), (d1, 128)], 0);
    let dims = [Interval::extent(128), Interval::extent(47)];
    let constraints = [(linear, Interval::extent(6000))];

    let q = arena.floor_div(linear, 600).unwrap();
    let outer = arena.modulo(q, 10).unwrap();
    let unconstrained = RangeContext::new(&dims, &[], &[]);
    assert_eq!(arena.simplify(outer, &unconstrained), outer);
    let constrained = RangeContext::new(&dims, &[], &constraints);
    assert_eq!(arena.simplify(outer, &constrained), q);
    assert_eq!(arena.bounds(q, &constrained), Interval::new(0, 9));
}

#[test]
fn test_substitution() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);
    let div = arena.floor_div(d0, 2).unwrap();
    let replacement = arena.linear([(d1, 2)], 1);
    let replacements: FxHashMap<_, _> = [(Symbol::Dim(0), replacement)].into_iter().collect();
    assert_eq!(arena.substitute(div, &replacements), d1);
}

#[test]
fn test_rendering() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let d1 = arena.dim(1);
    let s0 = arena.param(0);
    let s1 = arena.param(1);
    let linear = arena.linear([(d0, 1), (d1, 128)], 0);
    let q = arena.floor_div(linear, 30).unwrap();
    let m = arena.modulo(q, 20).unwrap();
    assert_eq!(
        arena.render(m, &names),
        "((d0 + d1 * 128) floordiv 30) mod 20"
    );
    let reversed = arena.linear([(d0, -1)], 19);
    assert_eq!(arena.render(reversed, &names), "-d0 + 19");
    let unrolled = arena.linear([(s1, 1), (d1, 512), (s0, 516096), (d0, 4)], 0);
    assert_eq!(
        arena.render(unrolled, &names),
        "d0 * 4 + d1 * 512 + s0 * 516096 + s1"
    );
    let mixed = arena.linear([(m, 3), (d0, 1)], -2);
    assert_eq!(
        arena.render(mixed, &names),
        "d0 + (((d0 + d1 * 128) floordiv 30) mod 20) * 3 - 2"
    );
}

#[test]
fn test_term_order() {
    let mut arena = ExprArena::new();
    let d0 = arena.dim(0);
    let s0 = arena.param(0);
    let q = arena.floor_div(d0, 3).unwrap();
    let r = arena.modulo(d0, 3).unwrap();
    assert!(arena.compare(d0, s0).is_lt());
    assert!(arena.compare(s0, q).is_lt());
    assert!(arena.compare(q, r).is_lt());
    let sum = arena.linear([(s0, 1), (r, 1)], 0);
    assert_eq!(
        arena.symbols(sum).into_iter().collect::<Vec<_>>(),
        vec![Symbol::Dim(0), Symbol::Param(0)]
    );
}

#[derive(Clone, Debug)]
enum Step {
    AddSymbol(usize, i64),
    Scale(i64),
    AddConstant(i64),
    FloorDiv(i64),
    Mod(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..3usize, -5i64..=5).prop_map(|(s, c)| Step::AddSymbol(s, c)),
        (-4i64..=4).prop_map(Step::Scale),
        (-20i64..=20).prop_map(Step::AddConstant),
        (1i64..=12).prop_map(Step::FloorDiv),
        (1i64..=12).prop_map(Step::Mod),
    ]
}

/// Applies `steps` both symbolically and on concrete values.
fn build(arena: &mut ExprArena, steps: &[Step], values: &[i64; 3]) -> (ExprId, i64) {
    let mut expr = arena.constant(0);
    let mut reference = 0i64;
    for step in steps {
        match *step {
            Step::AddSymbol(s, c) => {
                let symbol = arena.dim(s);
                expr = arena.linear([(expr, 1), (symbol, c)], 0);
                reference += c * values[s];
            }
            Step::Scale(c) => {
                expr = arena.mul(expr, c);
                reference *= c;
            }
            Step::AddConstant(c) => {
                expr = arena.add_constant(expr, c);
                reference += c;
            }
            Step::FloorDiv(k) => {
                expr = arena.floor_div(expr, k).unwrap();
                reference = reference.div_euclid(k);
            }
            Step::Mod(k) => {
                expr = arena.modulo(expr, k).unwrap();
                reference = reference.rem_euclid(k);
            }
        }
    }
    (expr, reference)
}

proptest! {
    #[test]
    fn normalization_preserves_value(
        steps in prop::collection::vec(step(), 1..12),
        values in prop::array::uniform3(-50i64..50),
    ) {
        let mut arena = ExprArena::new();
        let (expr, reference) = build(&mut arena, &steps, &values);
        let env = |s: Symbol| match s {
            Symbol::Dim(i) => values[i],
            Symbol::Param(_) => 0,
        };
        prop_assert_eq!(arena.evaluate(expr, &env), reference);
    }

    #[test]
    fn range_simplification_preserves_value(
        steps in prop::collection::vec(step(), 1..12),
        extents in prop::array::uniform3(1i64..40),
        picks in prop::array::uniform3(0i64..1000),
    ) {
        let values = [picks[0] % extents[0], picks[1] % extents[1], picks[2] % extents[2]];
        let mut arena = ExprArena::new();
        let (expr, reference) = build(&mut arena, &steps, &values);
        let dims = extents.map(Interval::extent);
        let ranges = RangeContext::new(&dims, &[], &[]);
        let simplified = arena.simplify(expr, &ranges);
        let env = |s: Symbol| match s {
            Symbol::Dim(i) => values[i],
            Symbol::Param(_) => 0,
        };
        prop_assert_eq!(arena.evaluate(simplified, &env), reference);
        prop_assert!(arena.bounds(expr, &ranges).contains(reference));
    }
}
