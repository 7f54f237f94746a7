use rustc_hash::FxHashMap;

use crate::prelude::*;

/// A map from a bounded integer domain to tensor coordinates.
///
/// The domain is one interval per dimension and parameter plus extra `expr in [lo, hi]`
/// constraints. Maps built through [`IndexingMap::simplify`] are canonical, so two of them
/// are equivalent exactly when they compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexingMap {
    dim_ranges: Vec<Interval>,
    param_ranges: Vec<Interval>,
    results: Vec<ExprId>,
    constraints: Vec<(ExprId, Interval)>,
}

impl IndexingMap {
    /// Builds a map as given. Call [`IndexingMap::simplify`] to canonicalize it.
    pub fn new(
        dim_ranges: Vec<Interval>,
        param_ranges: Vec<Interval>,
        results: Vec<ExprId>,
        constraints: Vec<(ExprId, Interval)>,
    ) -> Self {
        Self {
            dim_ranges,
            param_ranges,
            results,
            constraints,
        }
    }

    /// `(d0, ..., dn) -> (d0, ..., dn)` over a tensor with the given dimensions.
    pub fn identity(arena: &mut ExprArena, dims: &[i64]) -> Self {
        let results = (0..dims.len()).map(|i| arena.dim(i)).collect();
        Self::new(extents(dims), vec![], results, vec![]).simplify(arena)
    }

    /// The map of a scalar: no dimensions, no results.
    pub fn scalar() -> Self {
        Self::new(vec![], vec![], vec![], vec![])
    }

    pub fn dim_ranges(&self) -> &[Interval] {
        &self.dim_ranges
    }

    pub fn param_ranges(&self) -> &[Interval] {
        &self.param_ranges
    }

    pub fn results(&self) -> &[ExprId] {
        &self.results
    }

    pub fn constraints(&self) -> &[(ExprId, Interval)] {
        &self.constraints
    }

    pub fn dim_count(&self) -> usize {
        self.dim_ranges.len()
    }

    pub fn param_count(&self) -> usize {
        self.param_ranges.len()
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn range_context(&self) -> RangeContext<'_> {
        RangeContext::new(&self.dim_ranges, &self.param_ranges, &self.constraints)
    }

    /// Adds a domain constraint. The map is no longer canonical until simplified.
    pub fn add_constraint(&mut self, expr: ExprId, range: Interval) {
        self.constraints.push((expr, range));
    }

    /// Canonicalizes the map: folds single-symbol constraints into symbol ranges, drops
    /// constraints implied by the rest of the domain, and simplifies every expression
    /// against the domain.
    pub fn simplify(mut self, arena: &mut ExprArena) -> Self {
        while self.normalize_constraints(arena) {}
        self.remove_redundant_constraints(arena);
        let ranges = self.range_context();
        let results = self
            .results
            .iter()
            .map(|r| arena.simplify(*r, &ranges))
            .collect();
        self.results = results;
        self.constraints
            .sort_by(|a, b| arena.compare(a.0, b.0).then(a.1.cmp(&b.1)));
        self
    }

    /// Returns true when a symbol range got tighter.
    fn normalize_constraints(&mut self, arena: &mut ExprArena) -> bool {
        let mut tightened = false;
        let mut kept: Vec<(ExprId, Interval)> = Vec::with_capacity(self.constraints.len());
        for (expr, range) in std::mem::take(&mut self.constraints) {
            let expr = arena.simplify(
                expr,
                &RangeContext::new(&self.dim_ranges, &self.param_ranges, &[]),
            );
            if let Some(value) = arena.as_constant(expr) {
                // An unsatisfied literal constraint is kept as evidence of an empty domain.
                if !range.contains(value) {
                    kept.push((expr, range));
                }
                continue;
            }
            if let Some(slot) = arena
                .as_symbol(expr)
                .and_then(|symbol| self.symbol_range_mut(symbol))
            {
                let narrowed = slot.intersect(range);
                if narrowed != *slot {
                    *slot = narrowed;
                    tightened = true;
                }
                continue;
            }
            match kept.iter_mut().find(|(e, _)| *e == expr) {
                Some(existing) => existing.1 = existing.1.intersect(range),
                None => kept.push((expr, range)),
            }
        }
        self.constraints = kept;
        tightened
    }

    fn remove_redundant_constraints(&mut self, arena: &ExprArena) {
        let mut i = 0;
        while i < self.constraints.len() {
            let (expr, range) = self.constraints[i];
            let others = self
                .constraints
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, c)| *c)
                .collect::<Vec<_>>();
            let bounds = arena.bounds(
                expr,
                &RangeContext::new(&self.dim_ranges, &self.param_ranges, &others),
            );
            if !range.is_empty() && range.contains_interval(bounds) {
                self.constraints.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn symbol_range_mut(&mut self, symbol: Symbol) -> Option<&mut Interval> {
        match symbol {
            Symbol::Dim(i) => self.dim_ranges.get_mut(i),
            Symbol::Param(i) => self.param_ranges.get_mut(i),
        }
    }

    /// Composes `self: A -> B` with `other: B -> C` into `A -> C`.
    ///
    /// The parameters of `other` are appended after the parameters of `self`, and `self`'s
    /// results are constrained to `other`'s dimension ranges.
    pub fn compose(&self, other: &IndexingMap, arena: &mut ExprArena) -> Result<IndexingMap> {
        if other.dim_count() != self.result_count() {
            return Err(Error::MalformedExpression(format!(
                "cannot compose a map with {} results with a map over {} dimensions",
                self.result_count(),
                other.dim_count()
            )));
        }
        let offset = self.param_count();
        let mut replacements = FxHashMap::default();
        for (i, result) in self.results.iter().enumerate() {
            replacements.insert(Symbol::Dim(i), *result);
        }
        for j in 0..other.param_count() {
            replacements.insert(Symbol::Param(j), arena.param(offset + j));
        }
        let results = other
            .results
            .iter()
            .map(|r| arena.substitute(*r, &replacements))
            .collect();
        let mut constraints = self.constraints.clone();
        for (expr, range) in &other.constraints {
            constraints.push((arena.substitute(*expr, &replacements), *range));
        }
        for (result, range) in self.results.iter().zip(&other.dim_ranges) {
            constraints.push((*result, *range));
        }
        let param_ranges = self
            .param_ranges
            .iter()
            .chain(&other.param_ranges)
            .copied()
            .collect();
        Ok(
            IndexingMap::new(self.dim_ranges.clone(), param_ranges, results, constraints)
                .simplify(arena),
        )
    }

    /// True when the domain provably contains no point.
    pub fn is_known_empty(&self, arena: &ExprArena) -> bool {
        if self
            .dim_ranges
            .iter()
            .chain(&self.param_ranges)
            .any(Interval::is_empty)
        {
            return true;
        }
        let ranges = RangeContext::new(&self.dim_ranges, &self.param_ranges, &[]);
        self.constraints.iter().any(|(expr, range)| {
            range.is_empty() || arena.bounds(*expr, &ranges).is_disjoint(*range)
        })
    }

    /// Results at a concrete point. Missing coordinates read as zero.
    pub fn evaluate(&self, arena: &ExprArena, dims: &[i64], params: &[i64]) -> Vec<i64> {
        let env = point(dims, params);
        self.results
            .iter()
            .map(|r| arena.evaluate(*r, &env))
            .collect()
    }

    /// Whether a concrete point lies in the domain.
    pub fn contains(&self, arena: &ExprArena, dims: &[i64], params: &[i64]) -> bool {
        if dims.len() != self.dim_count() || params.len() != self.param_count() {
            return false;
        }
        let in_ranges = self
            .dim_ranges
            .iter()
            .zip(dims)
            .chain(self.param_ranges.iter().zip(params))
            .all(|(range, value)| range.contains(*value));
        let env = point(dims, params);
        in_ranges
            && self
                .constraints
                .iter()
                .all(|(expr, range)| range.contains(arena.evaluate(*expr, &env)))
    }

    pub fn format(&self, arena: &ExprArena, printer: &IndexingMapPrinter) -> String {
        printer.print_map(arena, self)
    }
}

/// `[0, d - 1]` for every dimension.
pub(crate) fn extents(dims: &[i64]) -> Vec<Interval> {
    dims.iter().map(|d| Interval::extent(*d)).collect()
}

fn point<'a>(dims: &'a [i64], params: &'a [i64]) -> impl Fn(Symbol) -> i64 + 'a {
    move |symbol| match symbol {
        Symbol::Dim(i) => dims.get(i).copied().unwrap_or(0),
        Symbol::Param(i) => params.get(i).copied().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_indexing_eq;

    #[test]
    fn test_identity_composition() {
        let mut arena = ExprArena::new();
        let d0 = arena.dim(0);
        let d1 = arena.dim(1);
        let transposed = IndexingMap::new(extents(&[4, 6]), vec![], vec![d1, d0], vec![])
            .simplify(&mut arena);
        let identity = IndexingMap::identity(&mut arena, &[6, 4]);
        assert_eq!(transposed.compose(&identity, &mut arena).unwrap(), transposed);
        let back = IndexingMap::identity(&mut arena, &[4, 6]);
        assert_eq!(back.compose(&transposed, &mut arena).unwrap(), transposed);
    }

    #[test]
    fn test_composition_mismatch() {
        let mut arena = ExprArena::new();
        let a = IndexingMap::identity(&mut arena, &[4, 6]);
        let b = IndexingMap::identity(&mut arena, &[24]);
        assert!(matches!(
            a.compose(&b, &mut arena),
            Err(Error::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_composition_appends_parameters() {
        let mut arena = ExprArena::new();
        let d0 = arena.dim(0);
        let s0 = arena.param(0);
        // (d0)[s0] -> (d0, s0), d0 in [0, 9], s0 in [0, 4]
        let inner = IndexingMap::new(extents(&[10]), extents(&[5]), vec![d0, s0], vec![])
            .simplify(&mut arena);
        let x = arena.linear([(d0, 1), (s0, 10)], 0);
        let outer = IndexingMap::new(extents(&[30]), extents(&[2]), vec![x], vec![])
            .simplify(&mut arena);
        let composed = outer.compose(&inner, &mut arena).unwrap();
        assert_eq!(composed.param_count(), 2);
        let s1 = arena.param(1);
        assert_eq!(composed.results(), &[x, s1]);
        // d0 + s0 * 10 <= 9 can't be folded into a range, so it stays
        assert_eq!(composed.constraints().len(), 1);
        assert!(composed.contains(&arena, &[3], &[0, 4]));
        assert!(!composed.contains(&arena, &[3], &[1, 4]));
    }

    #[test]
    fn test_constraints_fold_into_ranges() {
        let mut arena = ExprArena::new();
        let d0 = arena.dim(0);
        let d1 = arena.dim(1);
        let x = arena.linear([(d0, 1), (d1, 4)], 0);
        let mut map = IndexingMap::new(extents(&[4, 8]), vec![], vec![x], vec![]);
        map.add_constraint(d1, Interval::new(2, 20));
        map.add_constraint(x, Interval::new(0, 100));
        let map = map.simplify(&mut arena);
        assert_eq!(map.dim_ranges()[1], Interval::new(2, 7));
        assert!(map.constraints().is_empty());
        assert_indexing_eq(
            &map.format(&arena, &IndexingMapPrinter::default()),
            "(d0, d1) -> (d0 + d1 * 4)
             domain:
             d0 in [0, 3]
             d1 in [2, 7]",
        );
    }

    #[test]
    fn test_empty_domain() {
        let mut arena = ExprArena::new();
        let d0 = arena.dim(0);
        let d1 = arena.dim(1);
        let x = arena.add(d0, d1);
        let mut map = IndexingMap::new(extents(&[4, 4]), vec![], vec![x], vec![]);
        map.add_constraint(x, Interval::new(10, 12));
        let map = map.simplify(&mut arena);
        assert!(map.is_known_empty(&arena));

        let mut map = IndexingMap::new(extents(&[4]), vec![], vec![d0], vec![]);
        map.add_constraint(d0, Interval::new(5, 6));
        assert!(map.simplify(&mut arena).is_known_empty(&arena));

        let full = IndexingMap::identity(&mut arena, &[4]);
        assert!(!full.is_known_empty(&arena));
    }
}
