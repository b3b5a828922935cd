use serde::{Serialize, Deserialize};

use crate::core::error::{Error, Result};
use crate::core::types::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Int,
    Bool,
    Timestamp,
    BigInt,
    Float,
    Uint32Set,
    Int64Set,
    String,
    Json,
    TokenCount,
    Factors,
}

impl AttrType {
    pub fn from_u32(raw: u32) -> Result<Self> {
        Ok(match raw {
            0 => AttrType::Int,
            1 => AttrType::Bool,
            2 => AttrType::Timestamp,
            3 => AttrType::BigInt,
            4 => AttrType::Float,
            5 => AttrType::Uint32Set,
            6 => AttrType::Int64Set,
            7 => AttrType::String,
            8 => AttrType::Json,
            9 => AttrType::TokenCount,
            10 => AttrType::Factors,
            other => return Err(Error::corrupt(format!("unknown attribute type {}", other))),
        })
    }

    pub fn to_u32(self) -> u32 {
        match self {
            AttrType::Int => 0,
            AttrType::Bool => 1,
            AttrType::Timestamp => 2,
            AttrType::BigInt => 3,
            AttrType::Float => 4,
            AttrType::Uint32Set => 5,
            AttrType::Int64Set => 6,
            AttrType::String => 7,
            AttrType::Json => 8,
            AttrType::TokenCount => 9,
            AttrType::Factors => 10,
        }
    }

    pub fn is_mva(self) -> bool {
        matches!(self, AttrType::Uint32Set | AttrType::Int64Set)
    }

    pub fn is_string_like(self) -> bool {
        matches!(self, AttrType::String | AttrType::Json | AttrType::Factors)
    }

    /// Default slot width in bits when the caller does not ask for a
    /// narrower bitfield.
    pub fn default_bits(self) -> u32 {
        match self {
            AttrType::Bool => 1,
            AttrType::BigInt => 64,
            _ => 32,
        }
    }

    pub fn updatable(self) -> bool {
        !matches!(self, AttrType::TokenCount | AttrType::Factors)
    }
}

/// Bit address of one attribute inside the static row area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrLocator {
    pub bit_offset: u32,
    pub bit_count: u32,
}

impl AttrLocator {
    /// Whole aligned 32-bit slot?
    pub fn is_word(&self) -> bool {
        self.bit_count == 32 && self.bit_offset % 32 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub locator: AttrLocator,
}

/// Doc ids occupy the first two row words.
pub const DOCID_ROW_WORDS: u32 = 2;

/// Index schema: the ordered full-text fields plus the typed attribute
/// columns with their packed row locators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<String>,
    pub attrs: Vec<Attribute>,
    /// Static attribute area, in bits (docid words excluded).
    attr_bits: u32,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn add_field(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.fields.len() >= 64 {
            // Field masks are zipped 64-bit words
            return Err(Error::schema("too many full-text fields (max 64)"));
        }
        if self.fields.iter().any(|f| *f == name) {
            return Err(Error::schema(format!("duplicate field '{}'", name)));
        }
        self.fields.push(name);
        Ok(())
    }

    /// Append an attribute, packing its locator after the existing ones.
    /// Duplicate names keep the first attribute and report a warning via
    /// the returned flag.
    pub fn add_attr(&mut self, name: impl Into<String>, attr_type: AttrType) -> Result<bool> {
        self.add_attr_bits(name, attr_type, attr_type.default_bits())
    }

    pub fn add_attr_bits(&mut self, name: impl Into<String>, attr_type: AttrType, bit_count: u32) -> Result<bool> {
        let name = name.into();
        if self.attrs.iter().any(|a| a.name == name) {
            log::warn!("duplicate attribute '{}' ignored", name);
            return Ok(false);
        }
        if bit_count == 0 || bit_count > 64 {
            return Err(Error::schema(format!("bad bit count {} for '{}'", bit_count, name)));
        }
        let mut bit_offset = self.attr_bits;
        if bit_count >= 32 {
            // Word-sized slots stay aligned
            bit_offset = (bit_offset + 31) / 32 * 32;
        } else if bit_offset % 32 + bit_count > 32 {
            // Bitfields never straddle a word boundary
            bit_offset = (bit_offset + 31) / 32 * 32;
        }
        self.attr_bits = bit_offset + bit_count;
        self.attrs.push(Attribute {
            name,
            attr_type,
            locator: AttrLocator { bit_offset, bit_count },
        });
        Ok(true)
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Attribute area width in u32 words.
    pub fn attr_words(&self) -> u32 {
        (self.attr_bits + 31) / 32
    }

    /// Full row width (docid included) in u32 words.
    pub fn row_width(&self) -> u32 {
        DOCID_ROW_WORDS + self.attr_words()
    }

    pub fn mva_attrs(&self) -> Vec<usize> {
        self.attrs.iter().enumerate()
            .filter(|(_, a)| a.attr_type.is_mva())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn string_attrs(&self) -> Vec<usize> {
        self.attrs.iter().enumerate()
            .filter(|(_, a)| a.attr_type.is_string_like())
            .map(|(i, _)| i)
            .collect()
    }

    /// Merge precondition: identical fields, names and types.
    pub fn compatible_with(&self, other: &Schema) -> bool {
        self.fields == other.fields
            && self.attrs.len() == other.attrs.len()
            && self.attrs.iter().zip(&other.attrs).all(|(a, b)| {
                a.name == b.name && a.attr_type == b.attr_type
            })
    }
}

/// Read/write access to one fixed-width row.
pub struct RowAccess;

impl RowAccess {
    pub fn doc_id(row: &[u32]) -> DocId {
        DocId((row[0] as u64) | ((row[1] as u64) << 32))
    }

    pub fn set_doc_id(row: &mut [u32], doc_id: DocId) {
        row[0] = doc_id.0 as u32;
        row[1] = (doc_id.0 >> 32) as u32;
    }

    pub fn get_attr(row: &[u32], locator: AttrLocator) -> u64 {
        let attr_area = &row[DOCID_ROW_WORDS as usize..];
        let word = (locator.bit_offset / 32) as usize;
        if locator.bit_count == 64 {
            (attr_area[word] as u64) | ((attr_area[word + 1] as u64) << 32)
        } else if locator.bit_count == 32 {
            attr_area[word] as u64
        } else {
            let shift = locator.bit_offset % 32;
            let mask = (1u32 << locator.bit_count) - 1;
            ((attr_area[word] >> shift) & mask) as u64
        }
    }

    pub fn set_attr(row: &mut [u32], locator: AttrLocator, value: u64) {
        let attr_area = &mut row[DOCID_ROW_WORDS as usize..];
        let word = (locator.bit_offset / 32) as usize;
        if locator.bit_count == 64 {
            attr_area[word] = value as u32;
            attr_area[word + 1] = (value >> 32) as u32;
        } else if locator.bit_count == 32 {
            attr_area[word] = value as u32;
        } else {
            let shift = locator.bit_offset % 32;
            let mask = (1u32 << locator.bit_count) - 1;
            attr_area[word] = (attr_area[word] & !(mask << shift)) | (((value as u32) & mask) << shift);
        }
    }

    pub fn get_float(row: &[u32], locator: AttrLocator) -> f32 {
        f32::from_bits(Self::get_attr(row, locator) as u32)
    }

    pub fn set_float(row: &mut [u32], locator: AttrLocator, value: f32) {
        Self::set_attr(row, locator, value.to_bits() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_packing() {
        let mut schema = Schema::new();
        schema.add_attr("flag_a", AttrType::Bool).unwrap();
        schema.add_attr("flag_b", AttrType::Bool).unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema.add_attr("total", AttrType::BigInt).unwrap();

        let a = schema.attr("flag_a").unwrap().locator;
        let b = schema.attr("flag_b").unwrap().locator;
        assert_eq!((a.bit_offset, a.bit_count), (0, 1));
        assert_eq!((b.bit_offset, b.bit_count), (1, 1));

        // 32-bit slot aligned past the bit flags
        let price = schema.attr("price").unwrap().locator;
        assert_eq!(price.bit_offset, 32);
        let total = schema.attr("total").unwrap().locator;
        assert_eq!(total.bit_offset, 64);

        assert_eq!(schema.attr_words(), 4);
        assert_eq!(schema.row_width(), 6);
    }

    #[test]
    fn test_row_round_trip() {
        let mut schema = Schema::new();
        schema.add_attr("flag", AttrType::Bool).unwrap();
        schema.add_attr("price", AttrType::Int).unwrap();
        schema.add_attr("total", AttrType::BigInt).unwrap();
        schema.add_attr("rate", AttrType::Float).unwrap();

        let mut row = vec![0u32; schema.row_width() as usize];
        RowAccess::set_doc_id(&mut row, DocId(0x1_0000_0002));
        RowAccess::set_attr(&mut row, schema.attr("flag").unwrap().locator, 1);
        RowAccess::set_attr(&mut row, schema.attr("price").unwrap().locator, 4999);
        RowAccess::set_attr(&mut row, schema.attr("total").unwrap().locator, u64::MAX - 5);
        RowAccess::set_float(&mut row, schema.attr("rate").unwrap().locator, -2.5);

        assert_eq!(RowAccess::doc_id(&row), DocId(0x1_0000_0002));
        assert_eq!(RowAccess::get_attr(&row, schema.attr("flag").unwrap().locator), 1);
        assert_eq!(RowAccess::get_attr(&row, schema.attr("price").unwrap().locator), 4999);
        assert_eq!(RowAccess::get_attr(&row, schema.attr("total").unwrap().locator), u64::MAX - 5);
        assert_eq!(RowAccess::get_float(&row, schema.attr("rate").unwrap().locator), -2.5);
    }

    #[test]
    fn test_duplicate_attr_keeps_first() {
        let mut schema = Schema::new();
        assert!(schema.add_attr("price", AttrType::Int).unwrap());
        assert!(!schema.add_attr("price", AttrType::Float).unwrap());
        assert_eq!(schema.attrs.len(), 1);
        assert_eq!(schema.attr("price").unwrap().attr_type, AttrType::Int);
    }

    #[test]
    fn test_schema_compatibility() {
        let mut a = Schema::new();
        a.add_field("title").unwrap();
        a.add_attr("price", AttrType::Int).unwrap();
        let mut b = a.clone();
        assert!(a.compatible_with(&b));
        b.add_attr("extra", AttrType::Float).unwrap();
        assert!(!a.compatible_with(&b));
    }
}
