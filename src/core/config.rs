use serde::{Serialize, Deserialize};

use crate::core::error::{Error, Result};

/// Doclist packing for single-hit documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitFormat {
    /// Hitlist is always a separate file.
    Plain,
    /// Single-hit documents inline the position into the doclist.
    Inline,
}

/// Row placement for attribute storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocinfoKind {
    None,
    /// Rows are delta-coded into the doclist itself.
    Inline,
    /// Rows live in their own `.spa` file.
    Extern,
}

/// Which words skip hitlist emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitlessMode {
    None,
    All,
    Words(Vec<String>),
}

/// Inplace-merge tuning. The hit temp file doubles as the final doclist
/// when enabled; gaps and factors control relocation slack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InplaceConfig {
    pub enable: bool,
    pub hit_gap: usize,
    pub docinfo_gap: usize,
    pub reloc_factor: f32,
    pub write_factor: f32,
}

impl Default for InplaceConfig {
    fn default() -> Self {
        InplaceConfig {
            enable: false,
            hit_gap: 0,
            docinfo_gap: 0,
            reloc_factor: 0.1,
            write_factor: 0.1,
        }
    }
}

/// I/O rate limits. Zero disables the corresponding cap.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub max_iops: u32,
    pub max_iosize: u32,
}

pub const WRITE_BUFFER_DEFAULT: usize = 1024 * 1024;
pub const WRITE_BUFFER_FLOOR: usize = 256 * 1024;

/// Build + open settings for one index. One field per recognized option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub mem_limit: usize,
    pub write_buffer: usize,
    pub hit_format: HitFormat,
    pub docinfo: DocinfoKind,
    pub min_prefix_len: usize,
    pub min_infix_len: usize,
    pub max_substring_len: usize,
    pub keep_attrs: bool,
    pub keep_attrs_list: Vec<String>,
    pub inplace: InplaceConfig,
    pub throttle: ThrottleConfig,
    pub mlock: bool,
    /// 64-bit word hashing (FNV-1a) vs 32-bit (CRC32).
    pub use_64bit: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            mem_limit: 128 * 1024 * 1024,
            write_buffer: WRITE_BUFFER_DEFAULT,
            hit_format: HitFormat::Plain,
            docinfo: DocinfoKind::Extern,
            min_prefix_len: 0,
            min_infix_len: 0,
            max_substring_len: 0,
            keep_attrs: false,
            keep_attrs_list: Vec::new(),
            inplace: InplaceConfig::default(),
            throttle: ThrottleConfig::default(),
            mlock: false,
            use_64bit: true,
        }
    }
}

impl IndexConfig {
    /// Clamp and cross-check the option set before a build.
    pub fn validate(&mut self) -> Result<()> {
        if self.write_buffer < WRITE_BUFFER_FLOOR {
            self.write_buffer = WRITE_BUFFER_FLOOR;
        }
        if self.min_prefix_len > 0 && self.min_infix_len > 0 {
            return Err(Error::config("min_prefix_len and min_infix_len are mutually exclusive"));
        }
        if self.max_substring_len > 0 && self.max_substring_len < self.min_infix_len {
            return Err(Error::config("max_substring_len is below min_infix_len"));
        }
        if self.docinfo == DocinfoKind::Inline && self.hit_format == HitFormat::Inline {
            // Inline rows ride the doclist; single-hit packing would collide
            return Err(Error::config("docinfo=inline requires hit_format=plain"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_buffer_floor() {
        let mut config = IndexConfig { write_buffer: 1024, ..Default::default() };
        config.validate().unwrap();
        assert_eq!(config.write_buffer, WRITE_BUFFER_FLOOR);
    }

    #[test]
    fn test_prefix_infix_exclusive() {
        let mut config = IndexConfig {
            min_prefix_len: 2,
            min_infix_len: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
