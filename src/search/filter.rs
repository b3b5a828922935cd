use crate::attr::mva::{read_values, ArenaHandle, MvaArena};
use crate::attr::strings;
use crate::core::error::{Error, Result};
use crate::schema::schema::{AttrLocator, AttrType, RowAccess, Schema};

/// Filter predicate, one per attribute reference in the query.
#[derive(Debug, Clone)]
pub enum FilterKind {
    Values(Vec<u64>),
    Range { min: u64, max: u64, has_equal: bool },
    FloatRange { min: f32, max: f32, has_equal: bool },
    String(Vec<u8>),
    StringList(Vec<Vec<u8>>),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvaFunc {
    None,
    Any,
    All,
}

/// One filter as specified by the caller.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub attr: String,
    pub kind: FilterKind,
    pub exclude: bool,
    pub mva_func: MvaFunc,
}

impl FilterSpec {
    pub fn range(attr: impl Into<String>, min: u64, max: u64) -> Self {
        FilterSpec {
            attr: attr.into(),
            kind: FilterKind::Range { min, max, has_equal: true },
            exclude: false,
            mva_func: MvaFunc::None,
        }
    }

    pub fn values(attr: impl Into<String>, values: impl IntoIterator<Item = u64>) -> Self {
        let mut sorted: Vec<u64> = values.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        FilterSpec {
            attr: attr.into(),
            kind: FilterKind::Values(sorted),
            exclude: false,
            mva_func: MvaFunc::None,
        }
    }

    /// Filters against the match weight can only run after ranking.
    pub fn is_weight_dependent(&self) -> bool {
        self.attr == "@weight"
    }
}

/// The read-only pools a row evaluation may need to chase offsets
/// into.
#[derive(Clone, Copy)]
pub struct RowPools<'a> {
    pub mva: &'a [u8],
    pub strings: &'a [u8],
    pub arena: Option<&'a MvaArena>,
}

impl<'a> RowPools<'a> {
    pub fn empty() -> Self {
        RowPools { mva: &[], strings: &[], arena: None }
    }

    /// Resolve an MVA slot through the arena flag or the sidecar.
    pub fn mva_values(&self, slot: u32, is_64bit: bool) -> Result<Vec<u64>> {
        if let Some(off) = ArenaHandle::from_slot(slot) {
            let arena = self.arena
                .ok_or_else(|| Error::corrupt("arena-flagged slot without an arena"))?;
            let words = arena.read_slot(off)
                .ok_or_else(|| Error::corrupt("stale mva arena slot"))?;
            if is_64bit {
                return Ok(words.chunks(2)
                    .map(|pair| (pair[0] as u64) | ((*pair.get(1).unwrap_or(&0) as u64) << 32))
                    .collect());
            }
            return Ok(words.into_iter().map(|w| w as u64).collect());
        }
        read_values(self.mva, slot, is_64bit)
    }
}

/// A filter compiled against a concrete schema.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub spec: FilterSpec,
    pub attr_type: AttrType,
    pub locator: AttrLocator,
}

/// AND-combined filter set for the non-weight stage.
#[derive(Debug, Clone, Default)]
pub struct FilterTree {
    pub filters: Vec<CompiledFilter>,
}

/// Split and compile the caller's filters: the row-stage tree plus
/// the weight-dependent leftovers.
pub fn compile_filters(schema: &Schema, specs: &[FilterSpec]) -> Result<(FilterTree, Vec<FilterSpec>)> {
    let mut tree = FilterTree::default();
    let mut late = Vec::new();
    for spec in specs {
        if spec.is_weight_dependent() {
            late.push(spec.clone());
            continue;
        }
        let attr = schema.attr(&spec.attr)
            .ok_or_else(|| Error::schema(format!("filter on unknown attribute '{}'", spec.attr)))?;
        if attr.attr_type.is_mva() && spec.mva_func == MvaFunc::None {
            return Err(Error::schema(format!(
                "filter on mva attribute '{}' needs any()/all()", spec.attr)));
        }
        tree.filters.push(CompiledFilter {
            spec: spec.clone(),
            attr_type: attr.attr_type,
            locator: attr.locator,
        });
    }
    Ok((tree, late))
}

fn scalar_passes(kind: &FilterKind, value: u64, float_value: f32) -> bool {
    match kind {
        FilterKind::Values(values) => values.binary_search(&value).is_ok(),
        FilterKind::Range { min, max, has_equal } => {
            if *has_equal {
                value >= *min && value <= *max
            } else {
                value > *min && value < *max
            }
        }
        FilterKind::FloatRange { min, max, has_equal } => {
            if *has_equal {
                float_value >= *min && float_value <= *max
            } else {
                float_value > *min && float_value < *max
            }
        }
        FilterKind::Null => value == 0,
        FilterKind::String(_) | FilterKind::StringList(_) => false,
    }
}

impl CompiledFilter {
    pub fn eval(&self, row: &[u32], pools: RowPools) -> Result<bool> {
        let raw = RowAccess::get_attr(row, self.locator);
        let passes = if self.attr_type.is_mva() {
            let is_64bit = self.attr_type == AttrType::Int64Set;
            let values = pools.mva_values(raw as u32, is_64bit)?;
            match (&self.spec.kind, self.spec.mva_func) {
                (FilterKind::Null, _) => values.is_empty(),
                (kind, MvaFunc::All) => {
                    !values.is_empty()
                        && values.iter().all(|&v| scalar_passes(kind, v, v as f32))
                }
                (kind, _) => values.iter().any(|&v| scalar_passes(kind, v, v as f32)),
            }
        } else if self.attr_type.is_string_like() {
            let blob = strings::read_blob(pools.strings, raw as u32)?;
            match &self.spec.kind {
                FilterKind::Null => blob.is_empty(),
                FilterKind::String(want) => blob == want.as_slice(),
                FilterKind::StringList(list) => list.iter().any(|want| blob == want.as_slice()),
                _ => false,
            }
        } else if self.attr_type == AttrType::Float {
            let float_value = RowAccess::get_float(row, self.locator);
            scalar_passes(&self.spec.kind, float_value as u64, float_value)
        } else {
            scalar_passes(&self.spec.kind, raw, raw as f32)
        };
        Ok(passes != self.spec.exclude)
    }

    /// Can any row inside [min_row, max_row] pass? Conservative:
    /// only inclusion filters on ranged scalars can prune.
    pub fn block_can_match(&self, min_row: &[u32], max_row: &[u32]) -> bool {
        if self.spec.exclude || self.attr_type.is_mva() || self.attr_type.is_string_like() {
            return true;
        }
        match &self.spec.kind {
            FilterKind::Range { min, max, .. } => {
                if self.attr_type == AttrType::Float {
                    return true;
                }
                let lo = RowAccess::get_attr(min_row, self.locator);
                let hi = RowAccess::get_attr(max_row, self.locator);
                *max >= lo && *min <= hi
            }
            FilterKind::FloatRange { min, max, .. } => {
                if self.attr_type != AttrType::Float {
                    return true;
                }
                let lo = RowAccess::get_float(min_row, self.locator);
                let hi = RowAccess::get_float(max_row, self.locator);
                *max >= lo && *min <= hi
            }
            FilterKind::Values(values) => {
                if self.attr_type == AttrType::Float {
                    return true;
                }
                let lo = RowAccess::get_attr(min_row, self.locator);
                let hi = RowAccess::get_attr(max_row, self.locator);
                values.iter().any(|&v| v >= lo && v <= hi)
            }
            _ => true,
        }
    }
}

impl FilterTree {
    pub fn eval(&self, row: &[u32], pools: RowPools) -> Result<bool> {
        for filter in &self.filters {
            if !filter.eval(row, pools)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn block_can_match(&self, min_row: &[u32], max_row: &[u32]) -> bool {
        self.filters.iter().all(|f| f.block_can_match(min_row, max_row))
    }
}
