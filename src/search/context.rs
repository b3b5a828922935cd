use std::time::Instant;

use crate::core::error::{Error, Result};
use crate::core::types::{DocId, StopFlag};
use crate::schema::schema::{AttrLocator, RowAccess, Schema};
use crate::search::filter::{compile_filters, FilterKind, FilterSpec, FilterTree, RowPools};

/// The expression seam toward the external ranker/sorter stack: the
/// core evaluates these against a row, it does not parse them.
#[derive(Debug, Clone)]
pub enum CalcExpr {
    AttrInt(AttrLocator),
    AttrFloat(AttrLocator),
    ConstInt(i64),
    ConstFloat(f32),
    Weight,
}

impl CalcExpr {
    pub fn eval(&self, row: &[u32], weight: f32) -> f64 {
        match self {
            CalcExpr::AttrInt(locator) => RowAccess::get_attr(row, *locator) as f64,
            CalcExpr::AttrFloat(locator) => RowAccess::get_float(row, *locator) as f64,
            CalcExpr::ConstInt(value) => *value as f64,
            CalcExpr::ConstFloat(value) => *value as f64,
            CalcExpr::Weight => weight as f64,
        }
    }
}

/// When during match processing an item is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcStage {
    Prefilter,
    Presort,
    Final,
}

#[derive(Debug, Clone)]
pub struct CalcItem {
    pub name: String,
    pub expr: CalcExpr,
    pub stage: CalcStage,
}

/// Per-query, per-doc attribute substitution, sorted by doc id.
#[derive(Debug, Clone)]
pub struct AttrOverride {
    pub locator: AttrLocator,
    pairs: Vec<(DocId, u64)>,
}

impl AttrOverride {
    pub fn new(locator: AttrLocator, mut pairs: Vec<(DocId, u64)>) -> Self {
        pairs.sort_by_key(|(doc, _)| *doc);
        AttrOverride { locator, pairs }
    }

    pub fn apply(&self, doc_id: DocId, row: &mut [u32]) {
        if let Ok(at) = self.pairs.binary_search_by_key(&doc_id, |(doc, _)| *doc) {
            RowAccess::set_attr(row, self.locator, self.pairs[at].1);
        }
    }
}

/// One accepted candidate, as handed to the external sorter.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub doc_id: DocId,
    pub weight: f32,
    pub row: Vec<u32>,
    /// Calculated items, by stage order then declaration order.
    pub values: Vec<(String, f64)>,
}

/// Everything a single query evaluation carries.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<FilterSpec>,
    pub overrides: Vec<(String, Vec<(DocId, u64)>)>,
    pub calc: Vec<CalcItem>,
    /// Stop after this many accepted matches; zero is unlimited.
    pub cutoff: usize,
    pub reverse_scan: bool,
    pub max_query_time_us: u64,
}

/// Compiled per-query state: filter tree, overrides, calc vectors,
/// deadline and cancellation.
pub struct QueryContext {
    pub tree: FilterTree,
    pub late_filters: Vec<FilterSpec>,
    pub overrides: Vec<AttrOverride>,
    pub calc_prefilter: Vec<CalcItem>,
    pub calc_presort: Vec<CalcItem>,
    pub calc_final: Vec<CalcItem>,
    pub cutoff: usize,
    pub reverse_scan: bool,
    pub stop: StopFlag,
    started: Instant,
    max_query_time_us: u64,
}

impl QueryContext {
    pub fn new(schema: &Schema, options: &QueryOptions, stop: StopFlag) -> Result<Self> {
        let (tree, late_filters) = compile_filters(schema, &options.filters)?;

        let mut overrides = Vec::new();
        for (attr, pairs) in &options.overrides {
            let attr = schema.attr(attr)
                .ok_or_else(|| Error::schema(format!("override on unknown attribute '{}'", attr)))?;
            overrides.push(AttrOverride::new(attr.locator, pairs.clone()));
        }

        let mut calc_prefilter = Vec::new();
        let mut calc_presort = Vec::new();
        let mut calc_final = Vec::new();
        for item in &options.calc {
            match item.stage {
                CalcStage::Prefilter => calc_prefilter.push(item.clone()),
                CalcStage::Presort => calc_presort.push(item.clone()),
                CalcStage::Final => calc_final.push(item.clone()),
            }
        }

        Ok(QueryContext {
            tree,
            late_filters,
            overrides,
            calc_prefilter,
            calc_presort,
            calc_final,
            cutoff: options.cutoff,
            reverse_scan: options.reverse_scan,
            stop,
            started: Instant::now(),
            max_query_time_us: options.max_query_time_us,
        })
    }

    pub fn check_deadline(&self) -> Result<()> {
        self.stop.check()?;
        if self.max_query_time_us > 0
            && self.started.elapsed().as_micros() as u64 > self.max_query_time_us
        {
            return Err(Error::interrupted());
        }
        Ok(())
    }

    /// Copy the row and apply per-query overrides.
    pub fn override_row(&self, doc_id: DocId, row: &[u32]) -> Vec<u32> {
        let mut copy = row.to_vec();
        for over in &self.overrides {
            over.apply(doc_id, &mut copy);
        }
        copy
    }

    /// Filter one candidate row; on pass, build the match with the
    /// prefilter and presort items evaluated.
    pub fn process_row(
        &self,
        doc_id: DocId,
        row: &[u32],
        weight: f32,
        pools: RowPools,
    ) -> Result<Option<QueryMatch>> {
        let row = self.override_row(doc_id, row);

        let mut values = Vec::new();
        for item in &self.calc_prefilter {
            values.push((item.name.clone(), item.expr.eval(&row, weight)));
        }
        if !self.tree.eval(&row, pools)? {
            return Ok(None);
        }
        for item in &self.calc_presort {
            values.push((item.name.clone(), item.expr.eval(&row, weight)));
        }
        Ok(Some(QueryMatch { doc_id, weight, row, values }))
    }

    /// Post-ranking stage: weight filters plus the final calc items.
    pub fn finalize_match(&self, m: &mut QueryMatch) -> bool {
        for spec in &self.late_filters {
            let passes = match &spec.kind {
                FilterKind::Range { min, max, has_equal } => {
                    let w = m.weight as u64;
                    if *has_equal { w >= *min && w <= *max } else { w > *min && w < *max }
                }
                FilterKind::FloatRange { min, max, has_equal } => {
                    if *has_equal { m.weight >= *min && m.weight <= *max }
                    else { m.weight > *min && m.weight < *max }
                }
                FilterKind::Values(values) => values.binary_search(&(m.weight as u64)).is_ok(),
                _ => true,
            };
            if passes == spec.exclude {
                return false;
            }
        }
        for item in &self.calc_final {
            m.values.push((item.name.clone(), item.expr.eval(&m.row, m.weight)));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::AttrType;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema
    }

    fn row(schema: &Schema, doc: u64, price: u64) -> Vec<u32> {
        let mut row = vec![0u32; schema.row_width() as usize];
        RowAccess::set_doc_id(&mut row, DocId(doc));
        RowAccess::set_attr(&mut row, schema.attr("price").unwrap().locator, price);
        row
    }

    #[test]
    fn test_process_row_filters_and_calcs() {
        let schema = schema();
        let options = QueryOptions {
            filters: vec![FilterSpec::range("price", 100, 200)],
            calc: vec![CalcItem {
                name: "doubled".to_string(),
                expr: CalcExpr::AttrInt(schema.attr("price").unwrap().locator),
                stage: CalcStage::Presort,
            }],
            ..Default::default()
        };
        let ctx = QueryContext::new(&schema, &options, StopFlag::new()).unwrap();

        let hit = ctx.process_row(DocId(1), &row(&schema, 1, 150), 1.0, RowPools::empty()).unwrap();
        let m = hit.unwrap();
        assert_eq!(m.values, vec![("doubled".to_string(), 150.0)]);

        let miss = ctx.process_row(DocId(2), &row(&schema, 2, 500), 1.0, RowPools::empty()).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_override_applies_before_filter() {
        let schema = schema();
        let options = QueryOptions {
            filters: vec![FilterSpec::range("price", 100, 200)],
            overrides: vec![("price".to_string(), vec![(DocId(7), 150)])],
            ..Default::default()
        };
        let ctx = QueryContext::new(&schema, &options, StopFlag::new()).unwrap();

        // Stored price 999 fails, but doc 7 is overridden to 150
        let m = ctx.process_row(DocId(7), &row(&schema, 7, 999), 1.0, RowPools::empty()).unwrap();
        assert!(m.is_some());
        let m = ctx.process_row(DocId(8), &row(&schema, 8, 999), 1.0, RowPools::empty()).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn test_weight_filter_runs_late() {
        let schema = schema();
        let options = QueryOptions {
            filters: vec![FilterSpec::range("@weight", 10, 100)],
            ..Default::default()
        };
        let ctx = QueryContext::new(&schema, &options, StopFlag::new()).unwrap();
        assert!(ctx.tree.filters.is_empty());

        let mut strong = QueryMatch { doc_id: DocId(1), weight: 50.0, row: Vec::new(), values: Vec::new() };
        let mut weak = QueryMatch { doc_id: DocId(2), weight: 5.0, row: Vec::new(), values: Vec::new() };
        assert!(ctx.finalize_match(&mut strong));
        assert!(!ctx.finalize_match(&mut weak));
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let schema = schema();
        let stop = StopFlag::new();
        let ctx = QueryContext::new(&schema, &QueryOptions::default(), stop.clone()).unwrap();
        assert!(ctx.check_deadline().is_ok());
        stop.stop();
        assert!(ctx.check_deadline().is_err());
    }
}
