use std::fmt::Write;

use itertools::Itertools;

use crate::prelude::*;

/// Names symbols when printing maps. Unnamed dimensions print as `d{i}`, unnamed parameters
/// as `s{i}`.
#[derive(Clone, Debug, Default)]
pub struct IndexingMapPrinter {
    dim_names: Vec<String>,
    param_names: Vec<String>,
}

impl IndexingMapPrinter {
    pub fn new<D: Into<String>, P: Into<String>>(
        dim_names: impl IntoIterator<Item = D>,
        param_names: impl IntoIterator<Item = P>,
    ) -> Self {
        Self {
            dim_names: dim_names.into_iter().map(Into::into).collect(),
            param_names: param_names.into_iter().map(Into::into).collect(),
        }
    }

    /// `th_x, th_y, th_z, bl_x, bl_y, bl_z` and `chunk_id, unroll_id`.
    pub fn launch() -> Self {
        Self::new(LAUNCH_DIM_NAMES, LAUNCH_PARAM_NAMES)
    }

    pub fn symbol_name(&self, symbol: Symbol) -> String {
        match symbol {
            Symbol::Dim(i) => self
                .dim_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("d{i}")),
            Symbol::Param(i) => self
                .param_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("s{i}")),
        }
    }

    pub fn print_expr(&self, arena: &ExprArena, expr: ExprId) -> String {
        arena.render(expr, &|s| self.symbol_name(s))
    }

    /// ```text
    /// (d0, d1)[s0] -> (d1, s0)
    /// domain:
    /// d0 in [0, 9]
    /// d1 in [0, 4]
    /// s0 in [0, 2]
    /// d0 + d1 in [0, 12]
    /// ```
    pub fn print_map(&self, arena: &ExprArena, map: &IndexingMap) -> String {
        let dims = (0..map.dim_count())
            .map(|i| self.symbol_name(Symbol::Dim(i)))
            .join(", ");
        let mut out = format!("({dims})");
        if map.param_count() > 0 {
            let params = (0..map.param_count())
                .map(|i| self.symbol_name(Symbol::Param(i)))
                .join(", ");
            let _ = write!(out, "[{params}]");
        }
        let results = map
            .results()
            .iter()
            .map(|r| self.print_expr(arena, *r))
            .join(", ");
        let _ = writeln!(out, " -> ({results})");
        out.push_str("domain:\n");
        for (i, range) in map.dim_ranges().iter().enumerate() {
            let _ = writeln!(out, "{} in {range}", self.symbol_name(Symbol::Dim(i)));
        }
        for (i, range) in map.param_ranges().iter().enumerate() {
            let _ = writeln!(out, "{} in {range}", self.symbol_name(Symbol::Param(i)));
        }
        for (expr, range) in map.constraints() {
            let _ = writeln!(out, "{} in {range}", self.print_expr(arena, *expr));
        }
        out
    }
}
