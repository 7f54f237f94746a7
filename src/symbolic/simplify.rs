use rustc_hash::FxHashMap;

use super::{Expr, ExprArena, ExprId, Interval, Symbol};

// Range for symbols nobody declared. Kept well inside i64 so interval arithmetic can't wrap.
const UNBOUNDED: Interval = Interval::new(i64::MIN / 4, i64::MAX / 4);

/// Known ranges of symbols and of whole expressions, used to bound and simplify expressions.
#[derive(Clone, Copy, Debug)]
pub struct RangeContext<'a> {
    pub dims: &'a [Interval],
    pub params: &'a [Interval],
    pub constraints: &'a [(ExprId, Interval)],
}

impl<'a> RangeContext<'a> {
    pub fn new(
        dims: &'a [Interval],
        params: &'a [Interval],
        constraints: &'a [(ExprId, Interval)],
    ) -> Self {
        Self {
            dims,
            params,
            constraints,
        }
    }

    pub fn symbol_range(&self, symbol: Symbol) -> Interval {
        let range = match symbol {
            Symbol::Dim(i) => self.dims.get(i),
            Symbol::Param(i) => self.params.get(i),
        };
        range.copied().unwrap_or(UNBOUNDED)
    }

    fn constraint(&self, id: ExprId) -> Option<Interval> {
        self.constraints
            .iter()
            .filter(|(expr, _)| *expr == id)
            .map(|(_, range)| *range)
            .reduce(Interval::intersect)
    }
}

impl ExprArena {
    /// Conservative range of an expression. Constraints that name the exact expression tighten it.
    pub fn bounds(&self, id: ExprId, ranges: &RangeContext) -> Interval {
        let structural = match self.get(id) {
            Expr::Constant(value) => Interval::point(*value),
            Expr::Symbol(symbol) => ranges.symbol_range(*symbol),
            Expr::Sum { terms, constant } => {
                terms.iter().fold(Interval::point(*constant), |acc, (t, c)| {
                    acc + self.bounds(*t, ranges).scale(*c)
                })
            }
            Expr::FloorDiv(x, k) => self.bounds(*x, ranges).floor_div(*k),
            Expr::Mod(x, k) => self.bounds(*x, ranges).modulo(*k),
        };
        match ranges.constraint(id) {
            Some(known) => structural.intersect(known),
            None => structural,
        }
    }

    /// Rewrites an expression using what the ranges imply: point symbols become literals,
    /// floor divisions that can't change value fold, and modulos within a single period
    /// become a shifted copy of their operand.
    pub fn simplify(&mut self, id: ExprId, ranges: &RangeContext) -> ExprId {
        let mut memo = FxHashMap::default();
        self.simplify_memo(id, ranges, &mut memo)
    }

    fn simplify_memo(
        &mut self,
        id: ExprId,
        ranges: &RangeContext,
        memo: &mut FxHashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(done) = memo.get(&id) {
            return *done;
        }
        let result = match self.get(id).clone() {
            Expr::Constant(_) => id,
            Expr::Symbol(symbol) => {
                let range = ranges.symbol_range(symbol);
                if range.is_point() {
                    self.constant(range.lo)
                } else {
                    id
                }
            }
            Expr::Sum { terms, constant } => {
                let mut out = Vec::with_capacity(terms.len());
                for (term, c) in terms {
                    out.push((self.simplify_memo(term, ranges, memo), c));
                }
                self.linear(out, constant)
            }
            Expr::FloorDiv(x, divisor) => {
                let x = self.simplify_memo(x, ranges, memo);
                let range = self.bounds(x, ranges);
                if !range.is_empty() && range.lo.div_euclid(divisor) == range.hi.div_euclid(divisor)
                {
                    self.constant(range.lo.div_euclid(divisor))
                } else {
                    let rewritten = self.floor_div_unchecked(x, divisor);
                    self.resimplify(rewritten, &Expr::FloorDiv(x, divisor), ranges, memo)
                }
            }
            Expr::Mod(x, divisor) => {
                let x = self.simplify_memo(x, ranges, memo);
                let range = self.bounds(x, ranges);
                if !range.is_empty() && range.lo.div_euclid(divisor) == range.hi.div_euclid(divisor)
                {
                    let base = range.lo.div_euclid(divisor) * divisor;
                    self.add_constant(x, -base)
                } else {
                    let rewritten = self.modulo_unchecked(x, divisor);
                    self.resimplify(rewritten, &Expr::Mod(x, divisor), ranges, memo)
                }
            }
        };
        memo.insert(id, result);
        result
    }

    fn resimplify(
        &mut self,
        rewritten: ExprId,
        original: &Expr,
        ranges: &RangeContext,
        memo: &mut FxHashMap<ExprId, ExprId>,
    ) -> ExprId {
        if self.get(rewritten) == original {
            rewritten
        } else {
            self.simplify_memo(rewritten, ranges, memo)
        }
    }
}
