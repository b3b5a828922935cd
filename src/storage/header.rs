use crate::core::config::{DocinfoKind, HitFormat};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::io::reader::FileReader;
use crate::io::writer::FileWriter;
use crate::schema::schema::{AttrType, Schema};

/// "XDI1", little-endian.
pub const HEADER_MAGIC: u32 = 0x3149_4458;

pub const FORMAT_VERSION: u32 = 43;
pub const MIN_FORMAT_VERSION: u32 = 21;

/// Per-word skip lists appeared at this version.
pub const VERSION_SKIPLISTS: u32 = 31;
/// Infix block layout appeared at this version.
pub const VERSION_INFIX_BLOCKS: u32 = 34;
/// Per-field token length totals appeared at this version.
pub const VERSION_FIELD_LENS: u32 = 35;

/// Dictionary flavor recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictFlavor {
    Crc,
    Keywords,
}

/// Tokenizer facts the searcher must reproduce bit-identically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenizerSettingsDisk {
    pub fingerprint: u64,
    pub min_word_len: u32,
    pub blend_mode: u32,
    pub bigram_mode: u32,
    pub bigram_words: Vec<String>,
}

/// Dictionary facts the searcher must reproduce bit-identically.
#[derive(Debug, Clone, PartialEq)]
pub struct DictSettingsDisk {
    pub flavor: DictFlavor,
    pub morphology: Vec<String>,
    pub morph_fingerprint: u64,
    pub stopwords_fingerprint: u64,
    pub stopwords_unstemmed: bool,
    pub hitless_all: bool,
    pub hitless_words: Vec<String>,
}

impl Default for DictSettingsDisk {
    fn default() -> Self {
        DictSettingsDisk {
            flavor: DictFlavor::Crc,
            morphology: Vec::new(),
            morph_fingerprint: 0,
            stopwords_fingerprint: 0,
            stopwords_unstemmed: false,
            hitless_all: false,
            hitless_words: Vec::new(),
        }
    }
}

/// The `.sph` payload: everything needed to reopen the file family.
#[derive(Debug, Clone)]
pub struct IndexHeader {
    pub version: u32,
    pub use_64bit: bool,
    pub docinfo: DocinfoKind,
    pub schema: Schema,
    pub min_doc_id: DocId,
    pub total_documents: u64,
    pub total_bytes: u64,
    pub total_hits: u64,

    pub dict_checkpoints_offset: u64,
    pub dict_checkpoint_count: u32,
    pub infix_codepoint_bytes: u32,
    pub infix_blocks_offset: u64,
    pub infix_hash_size: u64,

    pub hit_format: HitFormat,
    pub min_prefix_len: u32,
    pub min_infix_len: u32,
    pub max_substring_len: u32,

    pub tokenizer: TokenizerSettingsDisk,
    pub dict: DictSettingsDisk,

    pub kill_list_count: u64,
    /// First word (u32 index) of the min/max tail inside `.spa`.
    pub minmax_words_offset: u64,
    /// Per-word minimums inline rows are delta-coded against
    /// (docinfo=inline only).
    pub inline_min_row: Vec<u32>,

    pub field_lens_enabled: bool,
    pub field_lens: Vec<u64>,
}

impl IndexHeader {
    pub fn new(schema: Schema) -> Self {
        IndexHeader {
            version: FORMAT_VERSION,
            use_64bit: true,
            docinfo: DocinfoKind::Extern,
            schema,
            min_doc_id: DocId(0),
            total_documents: 0,
            total_bytes: 0,
            total_hits: 0,
            dict_checkpoints_offset: 0,
            dict_checkpoint_count: 0,
            infix_codepoint_bytes: 0,
            infix_blocks_offset: 0,
            infix_hash_size: 0,
            hit_format: HitFormat::Plain,
            min_prefix_len: 0,
            min_infix_len: 0,
            max_substring_len: 0,
            tokenizer: TokenizerSettingsDisk::default(),
            dict: DictSettingsDisk::default(),
            kill_list_count: 0,
            minmax_words_offset: 0,
            inline_min_row: Vec::new(),
            field_lens_enabled: false,
            field_lens: Vec::new(),
        }
    }

    pub fn has_skiplists(&self) -> bool {
        self.version >= VERSION_SKIPLISTS
    }

    fn save_string_list(writer: &mut FileWriter, list: &[String]) -> Result<()> {
        writer.write_u32(list.len() as u32)?;
        for item in list {
            writer.write_lstring(item.as_bytes())?;
        }
        Ok(())
    }

    fn load_string_list(reader: &mut FileReader) -> Result<Vec<String>> {
        let count = reader.read_u32()? as usize;
        let mut list = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let raw = reader.read_lstring()?;
            list.push(String::from_utf8(raw)
                .map_err(|_| Error::corrupt("non-utf8 string in header"))?);
        }
        Ok(list)
    }

    fn save_schema(writer: &mut FileWriter, schema: &Schema) -> Result<()> {
        Self::save_string_list(writer, &schema.fields)?;
        writer.write_u32(schema.attrs.len() as u32)?;
        for attr in &schema.attrs {
            writer.write_lstring(attr.name.as_bytes())?;
            writer.write_u32(attr.attr_type.to_u32())?;
            writer.write_u32(attr.locator.bit_offset)?;
            writer.write_u32(attr.locator.bit_count)?;
        }
        Ok(())
    }

    fn load_schema(reader: &mut FileReader) -> Result<Schema> {
        let mut schema = Schema::new();
        for field in Self::load_string_list(reader)? {
            schema.add_field(field)?;
        }
        let attr_count = reader.read_u32()? as usize;
        for _ in 0..attr_count {
            let name = String::from_utf8(reader.read_lstring()?)
                .map_err(|_| Error::corrupt("non-utf8 attribute name"))?;
            let attr_type = AttrType::from_u32(reader.read_u32()?)?;
            let bit_offset = reader.read_u32()?;
            let bit_count = reader.read_u32()?;
            schema.add_attr_bits(name, attr_type, bit_count)?;
            let stored = schema.attrs.last().unwrap().locator;
            if stored.bit_offset != bit_offset {
                return Err(Error::corrupt("schema locators do not repack identically"));
            }
        }
        Ok(schema)
    }

    pub fn save(&self, writer: &mut FileWriter) -> Result<()> {
        writer.write_u32(HEADER_MAGIC)?;
        writer.write_u32(self.version)?;
        writer.write_u32(self.use_64bit as u32)?;
        writer.write_u32(match self.docinfo {
            DocinfoKind::None => 0,
            DocinfoKind::Inline => 1,
            DocinfoKind::Extern => 2,
        })?;

        Self::save_schema(writer, &self.schema)?;
        writer.write_u64(self.min_doc_id.0)?;
        writer.write_u64(self.total_documents)?;
        writer.write_u64(self.total_bytes)?;
        writer.write_u64(self.total_hits)?;

        writer.write_u64(self.dict_checkpoints_offset)?;
        writer.write_u32(self.dict_checkpoint_count)?;
        writer.write_u32(self.infix_codepoint_bytes)?;
        writer.write_u64(self.infix_blocks_offset)?;
        writer.write_u64(self.infix_hash_size)?;

        writer.write_u32(match self.hit_format {
            HitFormat::Plain => 0,
            HitFormat::Inline => 1,
        })?;
        writer.write_u32(self.min_prefix_len)?;
        writer.write_u32(self.min_infix_len)?;
        writer.write_u32(self.max_substring_len)?;

        writer.write_u64(self.tokenizer.fingerprint)?;
        writer.write_u32(self.tokenizer.min_word_len)?;
        writer.write_u32(self.tokenizer.blend_mode)?;
        writer.write_u32(self.tokenizer.bigram_mode)?;
        Self::save_string_list(writer, &self.tokenizer.bigram_words)?;

        writer.write_u32(match self.dict.flavor {
            DictFlavor::Crc => 0,
            DictFlavor::Keywords => 1,
        })?;
        Self::save_string_list(writer, &self.dict.morphology)?;
        writer.write_u64(self.dict.morph_fingerprint)?;
        writer.write_u64(self.dict.stopwords_fingerprint)?;
        writer.write_u32(self.dict.stopwords_unstemmed as u32)?;
        writer.write_u32(self.dict.hitless_all as u32)?;
        Self::save_string_list(writer, &self.dict.hitless_words)?;

        writer.write_u64(self.kill_list_count)?;
        writer.write_u64(self.minmax_words_offset)?;
        writer.write_u32(self.inline_min_row.len() as u32)?;
        for &word in &self.inline_min_row {
            writer.write_u32(word)?;
        }

        // Field filter settings slot, unused by this engine
        writer.write_u32(0)?;

        writer.write_u32(self.field_lens_enabled as u32)?;
        if self.field_lens_enabled {
            for &total in &self.field_lens {
                writer.write_u64(total)?;
            }
        }
        Ok(())
    }

    pub fn load(reader: &mut FileReader) -> Result<Self> {
        let magic = reader.read_u32()?;
        if magic != HEADER_MAGIC {
            return Err(Error::corrupt(format!("bad header magic {:#010x}", magic)));
        }
        let version = reader.read_u32()?;
        if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(Error::new(
                ErrorKind::VersionUnsupported,
                format!("format version {} outside supported {}..={}", version, MIN_FORMAT_VERSION, FORMAT_VERSION),
            ));
        }
        let use_64bit = reader.read_u32()? != 0;
        let docinfo = match reader.read_u32()? {
            0 => DocinfoKind::None,
            1 => DocinfoKind::Inline,
            2 => DocinfoKind::Extern,
            other => return Err(Error::corrupt(format!("unknown docinfo kind {}", other))),
        };

        let schema = Self::load_schema(reader)?;
        let min_doc_id = DocId(reader.read_u64()?);
        let total_documents = reader.read_u64()?;
        let total_bytes = reader.read_u64()?;
        let total_hits = reader.read_u64()?;

        let dict_checkpoints_offset = reader.read_u64()?;
        let dict_checkpoint_count = reader.read_u32()?;

        let (infix_codepoint_bytes, infix_blocks_offset, infix_hash_size) =
            if version >= VERSION_INFIX_BLOCKS {
                (reader.read_u32()?, reader.read_u64()?, reader.read_u64()?)
            } else {
                (0, 0, 0)
            };

        let hit_format = match reader.read_u32()? {
            0 => HitFormat::Plain,
            1 => HitFormat::Inline,
            other => return Err(Error::corrupt(format!("unknown hit format {}", other))),
        };
        let min_prefix_len = reader.read_u32()?;
        let min_infix_len = reader.read_u32()?;
        let max_substring_len = reader.read_u32()?;

        let tokenizer = TokenizerSettingsDisk {
            fingerprint: reader.read_u64()?,
            min_word_len: reader.read_u32()?,
            blend_mode: reader.read_u32()?,
            bigram_mode: reader.read_u32()?,
            bigram_words: Self::load_string_list(reader)?,
        };

        let flavor = match reader.read_u32()? {
            0 => DictFlavor::Crc,
            1 => DictFlavor::Keywords,
            other => return Err(Error::corrupt(format!("unknown dict flavor {}", other))),
        };
        let dict = DictSettingsDisk {
            flavor,
            morphology: Self::load_string_list(reader)?,
            morph_fingerprint: reader.read_u64()?,
            stopwords_fingerprint: reader.read_u64()?,
            stopwords_unstemmed: reader.read_u32()? != 0,
            hitless_all: reader.read_u32()? != 0,
            hitless_words: Self::load_string_list(reader)?,
        };

        let kill_list_count = reader.read_u64()?;
        let minmax_words_offset = reader.read_u64()?;
        let inline_min_row_len = reader.read_u32()? as usize;
        let mut inline_min_row = Vec::with_capacity(inline_min_row_len.min(4096));
        for _ in 0..inline_min_row_len {
            inline_min_row.push(reader.read_u32()?);
        }

        let field_filter_count = reader.read_u32()?;
        if field_filter_count != 0 {
            return Err(Error::corrupt("field filter settings are not supported"));
        }

        let (field_lens_enabled, field_lens) = if version >= VERSION_FIELD_LENS {
            let enabled = reader.read_u32()? != 0;
            let mut lens = Vec::new();
            if enabled {
                for _ in 0..schema.fields.len() {
                    lens.push(reader.read_u64()?);
                }
            }
            (enabled, lens)
        } else {
            (false, Vec::new())
        };

        Ok(IndexHeader {
            version,
            use_64bit,
            docinfo,
            schema,
            min_doc_id,
            total_documents,
            total_bytes,
            total_hits,
            dict_checkpoints_offset,
            dict_checkpoint_count,
            infix_codepoint_bytes,
            infix_blocks_offset,
            infix_hash_size,
            hit_format,
            min_prefix_len,
            min_infix_len,
            max_substring_len,
            tokenizer,
            dict,
            kill_list_count,
            minmax_words_offset,
            inline_min_row,
            field_lens_enabled,
            field_lens,
        })
    }
}
