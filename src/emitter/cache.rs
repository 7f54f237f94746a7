use rustc_hash::FxHashMap;

use super::ValueId;
use crate::prelude::*;

#[derive(Debug, Default)]
struct Scope {
    values: FxHashMap<ValueRef, FxHashMap<IndexingMap, ValueId>>,
    indices: FxHashMap<ExprId, ValueId>,
}

/// Scalars and indices already emitted in the function being built.
///
/// A value read through an equal map is emitted once. Scopes follow the nesting of regions:
/// entries made inside a loop body disappear with it, while entries of enclosing regions
/// stay visible.
#[derive(Debug)]
pub struct EmissionCache {
    scopes: Vec<Scope>,
}

impl Default for EmissionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EmissionCache {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// The outermost scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn value(&self, value: ValueRef, map: &IndexingMap) -> Option<ValueId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.values.get(&value)?.get(map).copied())
    }

    pub fn insert_value(&mut self, value: ValueRef, map: IndexingMap, id: ValueId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.values.entry(value).or_default().insert(map, id);
        }
    }

    pub fn index(&self, expr: ExprId) -> Option<ValueId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.indices.get(&expr).copied())
    }

    pub fn insert_index(&mut self, expr: ExprId, id: ValueId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.indices.insert(expr, id);
        }
    }

    pub fn len(&self) -> usize {
        self.scopes
            .iter()
            .map(|s| s.values.values().map(FxHashMap::len).sum::<usize>() + s.indices.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use petgraph::graph::NodeIndex;

    use super::*;

    #[test]
    fn test_scoped_lookup() {
        let mut arena = ExprArena::new();
        let value = ValueRef::from(NodeIndex::new(3));
        let identity = IndexingMap::identity(&mut arena, &[4]);
        let reversed = {
            let d0 = arena.dim(0);
            let r = arena.linear([(d0, -1)], 3);
            IndexingMap::new(vec![Interval::extent(4)], vec![], vec![r], vec![])
                .simplify(&mut arena)
        };

        let mut cache = EmissionCache::new();
        cache.insert_value(value, identity.clone(), ValueId(1));
        cache.push_scope();
        cache.insert_value(value, reversed.clone(), ValueId(2));
        let d0 = arena.dim(0);
        cache.insert_index(d0, ValueId(5));
        assert_eq!(cache.value(value, &identity), Some(ValueId(1)));
        assert_eq!(cache.value(value, &reversed), Some(ValueId(2)));
        assert_eq!(cache.len(), 3);
        cache.pop_scope();
        assert_eq!(cache.value(value, &reversed), None);
        assert_eq!(cache.index(d0), None);
        cache.pop_scope();
        assert_eq!(cache.value(value, &identity), Some(ValueId(1)));
        assert!(!cache.is_empty());
    }
}
