use std::{cmp::Ordering, collections::BTreeSet};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// A variable of an indexing map. Dimensions come first in every map, then parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Dim(usize),
    Param(usize),
}

/// Handle to an interned expression inside an [`ExprArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A node of a semi-affine expression.
///
/// Nodes are always stored normalized: a `Sum` only holds non-constant, non-sum atoms with
/// nonzero coefficients, sorted by [`ExprArena::compare`], and never degenerates into a single
/// atom with coefficient one and no constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant(i64),
    Symbol(Symbol),
    Sum {
        terms: Vec<(ExprId, i64)>,
        constant: i64,
    },
    FloorDiv(ExprId, i64),
    Mod(ExprId, i64),
}

impl Expr {
    fn rank(&self) -> u8 {
        match self {
            Expr::Constant(_) => 0,
            Expr::Symbol(_) => 1,
            Expr::Sum { .. } => 2,
            Expr::FloorDiv(..) => 3,
            Expr::Mod(..) => 4,
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, Expr::Sum { .. } | Expr::FloorDiv(..) | Expr::Mod(..))
    }
}

/// Owns every expression built during one analysis. Expressions are hash-consed, so two
/// normalized expressions are structurally equal exactly when their ids are equal.
#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
    interned: FxHashMap<Expr, ExprId>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }

    fn intern(&mut self, expr: Expr) -> ExprId {
        if let Some(id) = self.interned.get(&expr) {
            return *id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr.clone());
        self.interned.insert(expr, id);
        id
    }

    pub fn constant(&mut self, value: i64) -> ExprId {
        self.intern(Expr::Constant(value))
    }

    pub fn symbol(&mut self, symbol: Symbol) -> ExprId {
        self.intern(Expr::Symbol(symbol))
    }

    pub fn dim(&mut self, index: usize) -> ExprId {
        self.symbol(Symbol::Dim(index))
    }

    pub fn param(&mut self, index: usize) -> ExprId {
        self.symbol(Symbol::Param(index))
    }

    pub fn as_constant(&self, id: ExprId) -> Option<i64> {
        match self.get(id) {
            Expr::Constant(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_symbol(&self, id: ExprId) -> Option<Symbol> {
        match self.get(id) {
            Expr::Symbol(symbol) => Some(*symbol),
            _ => None,
        }
    }

    pub fn add(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.linear([(lhs, 1), (rhs, 1)], 0)
    }

    pub fn sub(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.linear([(lhs, 1), (rhs, -1)], 0)
    }

    pub fn add_constant(&mut self, expr: ExprId, value: i64) -> ExprId {
        self.linear([(expr, 1)], value)
    }

    pub fn mul(&mut self, expr: ExprId, factor: i64) -> ExprId {
        self.linear([(expr, factor)], 0)
    }

    /// Builds `sum(coefficient * term) + constant` in canonical form.
    pub fn linear(
        &mut self,
        terms: impl IntoIterator<Item = (ExprId, i64)>,
        constant: i64,
    ) -> ExprId {
        let mut pending: Vec<(ExprId, i64)> = terms.into_iter().collect();
        let mut constant = constant;
        loop {
            let mut merged: FxHashMap<ExprId, i64> = FxHashMap::default();
            for (id, coefficient) in pending.drain(..) {
                match self.get(id) {
                    Expr::Constant(value) => constant += value * coefficient,
                    Expr::Sum {
                        terms,
                        constant: inner,
                    } => {
                        constant += inner * coefficient;
                        for (term, c) in terms {
                            *merged.entry(*term).or_default() += c * coefficient;
                        }
                    }
                    _ => *merged.entry(id).or_default() += coefficient,
                }
            }
            merged.retain(|_, c| *c != 0);
            match self.recombine(&mut merged) {
                Some((expr, coefficient, adjustment)) => {
                    constant += adjustment;
                    pending = merged.into_iter().collect();
                    pending.push((expr, coefficient));
                }
                None => {
                    pending = merged.into_iter().collect();
                    break;
                }
            }
        }
        pending.sort_by(|a, b| self.compare(a.0, b.0));
        if pending.is_empty() {
            return self.constant(constant);
        }
        if constant == 0 && pending.len() == 1 && pending[0].1 == 1 {
            return pending[0].0;
        }
        self.intern(Expr::Sum {
            terms: pending,
            constant,
        })
    }

    /// Finds `c * (x mod k)` next to `c * k * (x floordiv k)` and removes both from `merged`.
    /// Returns `(x, c, constant adjustment)` so the caller can add `c * x` back.
    fn recombine(&mut self, merged: &mut FxHashMap<ExprId, i64>) -> Option<(ExprId, i64, i64)> {
        let mut candidates = merged
            .iter()
            .filter_map(|(&id, &coefficient)| match self.get(id) {
                Expr::Mod(x, k) => Some((id, *x, *k, coefficient)),
                _ => None,
            })
            .collect::<Vec<_>>();
        candidates.sort();
        for (modulo, x, k, coefficient) in candidates {
            let quotient = self.floor_div_unchecked(x, k);
            let (terms, quotient_constant) = self.linear_parts(quotient);
            let scale = coefficient * k;
            if terms.is_empty()
                || !terms
                    .iter()
                    .all(|(term, c)| merged.get(term) == Some(&(c * scale)))
            {
                continue;
            }
            for (term, _) in &terms {
                merged.remove(term);
            }
            merged.remove(&modulo);
            return Some((x, coefficient, -scale * quotient_constant));
        }
        None
    }

    /// Splits an expression into its atoms and constant part.
    pub(crate) fn linear_parts(&self, id: ExprId) -> (Vec<(ExprId, i64)>, i64) {
        match self.get(id) {
            Expr::Constant(value) => (vec![], *value),
            Expr::Sum { terms, constant } => (terms.clone(), *constant),
            _ => (vec![(id, 1)], 0),
        }
    }

    pub fn floor_div(&mut self, expr: ExprId, divisor: i64) -> Result<ExprId> {
        if divisor <= 0 {
            return Err(Error::MalformedExpression(format!(
                "floor division by non-positive divisor {divisor}"
            )));
        }
        Ok(self.floor_div_unchecked(expr, divisor))
    }

    pub fn modulo(&mut self, expr: ExprId, divisor: i64) -> Result<ExprId> {
        if divisor <= 0 {
            return Err(Error::MalformedExpression(format!(
                "modulo by non-positive divisor {divisor}"
            )));
        }
        Ok(self.modulo_unchecked(expr, divisor))
    }

    pub(crate) fn floor_div_unchecked(&mut self, expr: ExprId, divisor: i64) -> ExprId {
        if divisor == 1 {
            return expr;
        }
        match self.get(expr) {
            Expr::Constant(value) => {
                let value = value.div_euclid(divisor);
                return self.constant(value);
            }
            Expr::FloorDiv(inner, d) => {
                let (inner, d) = (*inner, *d);
                return self.floor_div_unchecked(inner, d * divisor);
            }
            _ => {}
        }
        let (terms, constant) = self.linear_parts(expr);
        let common = terms
            .iter()
            .fold(gcd(divisor, constant), |g, (_, c)| gcd(g, *c));
        if common > 1 {
            let reduced = self.linear(
                terms.into_iter().map(|(t, c)| (t, c / common)),
                constant / common,
            );
            return self.floor_div_unchecked(reduced, divisor / common);
        }
        let (divisible, rest): (Vec<_>, Vec<_>) =
            terms.into_iter().partition(|(_, c)| c % divisor == 0);
        let quotient_constant = constant.div_euclid(divisor);
        if divisible.is_empty() && quotient_constant == 0 {
            return self.intern(Expr::FloorDiv(expr, divisor));
        }
        let rest = self.linear(rest, constant.rem_euclid(divisor));
        let remainder = self.floor_div_unchecked(rest, divisor);
        let mut out = divisible
            .into_iter()
            .map(|(t, c)| (t, c / divisor))
            .collect::<Vec<_>>();
        out.push((remainder, 1));
        self.linear(out, quotient_constant)
    }

    pub(crate) fn modulo_unchecked(&mut self, expr: ExprId, divisor: i64) -> ExprId {
        if divisor == 1 {
            return self.constant(0);
        }
        match self.get(expr) {
            Expr::Constant(value) => {
                let value = value.rem_euclid(divisor);
                return self.constant(value);
            }
            Expr::Mod(inner, d) if d % divisor == 0 => {
                let inner = *inner;
                return self.modulo_unchecked(inner, divisor);
            }
            _ => {}
        }
        let (terms, constant) = self.linear_parts(expr);
        let kept = terms
            .into_iter()
            .filter(|(_, c)| c % divisor != 0)
            .collect::<Vec<_>>();
        let constant = constant.rem_euclid(divisor);
        let common = kept
            .iter()
            .fold(gcd(divisor, constant), |g, (_, c)| gcd(g, *c));
        if common > 1 {
            let reduced = self.linear(
                kept.into_iter().map(|(t, c)| (t, c / common)),
                constant / common,
            );
            let inner = self.modulo_unchecked(reduced, divisor / common);
            return self.mul(inner, common);
        }
        let reduced = self.linear(kept, constant);
        if let Some(value) = self.as_constant(reduced) {
            return self.constant(value.rem_euclid(divisor));
        }
        self.intern(Expr::Mod(reduced, divisor))
    }

    /// Structural total order used to sort sum terms and constraints.
    pub fn compare(&self, lhs: ExprId, rhs: ExprId) -> Ordering {
        if lhs == rhs {
            return Ordering::Equal;
        }
        let (a, b) = (self.get(lhs), self.get(rhs));
        a.rank().cmp(&b.rank()).then_with(|| match (a, b) {
            (Expr::Constant(x), Expr::Constant(y)) => x.cmp(y),
            (Expr::Symbol(x), Expr::Symbol(y)) => x.cmp(y),
            (
                Expr::Sum {
                    terms: ta,
                    constant: ca,
                },
                Expr::Sum {
                    terms: tb,
                    constant: cb,
                },
            ) => ta
                .iter()
                .zip(tb)
                .map(|((x, cx), (y, cy))| self.compare(*x, *y).then(cx.cmp(cy)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
                .then(ta.len().cmp(&tb.len()))
                .then(ca.cmp(cb)),
            (Expr::FloorDiv(x, k), Expr::FloorDiv(y, m)) | (Expr::Mod(x, k), Expr::Mod(y, m)) => {
                self.compare(*x, *y).then(k.cmp(m))
            }
            _ => Ordering::Equal,
        })
    }

    pub fn evaluate(&self, id: ExprId, values: &dyn Fn(Symbol) -> i64) -> i64 {
        match self.get(id) {
            Expr::Constant(value) => *value,
            Expr::Symbol(symbol) => values(*symbol),
            Expr::Sum { terms, constant } => terms
                .iter()
                .fold(*constant, |acc, (t, c)| acc + c * self.evaluate(*t, values)),
            Expr::FloorDiv(x, k) => self.evaluate(*x, values).div_euclid(*k),
            Expr::Mod(x, k) => self.evaluate(*x, values).rem_euclid(*k),
        }
    }

    /// Replaces symbols by expressions and renormalizes.
    pub fn substitute(&mut self, id: ExprId, replacements: &FxHashMap<Symbol, ExprId>) -> ExprId {
        let mut memo = FxHashMap::default();
        self.substitute_memo(id, replacements, &mut memo)
    }

    fn substitute_memo(
        &mut self,
        id: ExprId,
        replacements: &FxHashMap<Symbol, ExprId>,
        memo: &mut FxHashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(done) = memo.get(&id) {
            return *done;
        }
        let result = match self.get(id).clone() {
            Expr::Constant(_) => id,
            Expr::Symbol(symbol) => replacements.get(&symbol).copied().unwrap_or(id),
            Expr::Sum { terms, constant } => {
                let mut out = Vec::with_capacity(terms.len());
                for (term, c) in terms {
                    out.push((self.substitute_memo(term, replacements, memo), c));
                }
                self.linear(out, constant)
            }
            Expr::FloorDiv(x, k) => {
                let x = self.substitute_memo(x, replacements, memo);
                self.floor_div_unchecked(x, k)
            }
            Expr::Mod(x, k) => {
                let x = self.substitute_memo(x, replacements, memo);
                self.modulo_unchecked(x, k)
            }
        };
        memo.insert(id, result);
        result
    }

    /// Every symbol the expression mentions, dimensions first.
    pub fn symbols(&self, id: ExprId) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(id, &mut out);
        out
    }

    fn collect_symbols(&self, id: ExprId, out: &mut BTreeSet<Symbol>) {
        match self.get(id) {
            Expr::Constant(_) => {}
            Expr::Symbol(symbol) => {
                out.insert(*symbol);
            }
            Expr::Sum { terms, .. } => {
                for (term, _) in terms {
                    self.collect_symbols(*term, out);
                }
            }
            Expr::FloorDiv(x, _) | Expr::Mod(x, _) => self.collect_symbols(*x, out),
        }
    }

    /// Renders an expression, e.g. `((th_x + bl_x * 128) floordiv 30) mod 20`.
    pub fn render(&self, id: ExprId, names: &dyn Fn(Symbol) -> String) -> String {
        let mut out = String::new();
        self.write_expr(id, names, &mut out);
        out
    }

    fn write_expr(&self, id: ExprId, names: &dyn Fn(Symbol) -> String, out: &mut String) {
        match self.get(id) {
            Expr::Constant(value) => out.push_str(&value.to_string()),
            Expr::Symbol(symbol) => out.push_str(&names(*symbol)),
            Expr::Sum { terms, constant } => {
                for (i, (term, c)) in terms.iter().enumerate() {
                    match (i, *c < 0) {
                        (0, true) => out.push('-'),
                        (0, false) => {}
                        (_, true) => out.push_str(" - "),
                        (_, false) => out.push_str(" + "),
                    }
                    if c.abs() != 1 || *c < 0 {
                        self.write_operand(*term, names, out);
                    } else {
                        self.write_expr(*term, names, out);
                    }
                    if c.abs() != 1 {
                        out.push_str(&format!(" * {}", c.abs()));
                    }
                }
                match constant.cmp(&0) {
                    Ordering::Greater => out.push_str(&format!(" + {constant}")),
                    Ordering::Less => out.push_str(&format!(" - {}", constant.abs())),
                    Ordering::Equal => {}
                }
            }
            Expr::FloorDiv(x, k) => {
                self.write_operand(*x, names, out);
                out.push_str(&format!(" floordiv {k}"));
            }
            Expr::Mod(x, k) => {
                self.write_operand(*x, names, out);
                out.push_str(&format!(" mod {k}"));
            }
        }
    }

    fn write_operand(&self, id: ExprId, names: &dyn Fn(Symbol) -> String, out: &mut String) {
        if self.get(id).is_compound() {
            out.push('(');
            self.write_expr(id, names, out);
            out.push(')');
        } else {
            self.write_expr(id, names, out);
        }
    }
}

pub(crate) fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
