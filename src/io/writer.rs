use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::compression::vbyte::VByte;
use crate::core::config::ThrottleConfig;
use crate::core::error::Result;
use crate::io::throttle::{IoStats, Throttle};

/// Buffered, throttled file writer with varint support. Every on-disk
/// structure except the memory-mapped reads goes through one of these.
pub struct FileWriter {
    pub path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    buffer_limit: usize,
    /// Logical write position, buffer included.
    pos: u64,
    throttle: Throttle,
}

impl FileWriter {
    pub fn create(path: impl AsRef<Path>, buffer_limit: usize, throttle: ThrottleConfig, stats: Arc<IoStats>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(FileWriter {
            path,
            file,
            buffer: Vec::with_capacity(buffer_limit),
            buffer_limit,
            pos: 0,
            throttle: Throttle::new(throttle, stats),
        })
    }

    /// Open an existing file for in-place rewriting, positioned at `offset`.
    pub fn open_at(path: impl AsRef<Path>, offset: u64, buffer_limit: usize, throttle: ThrottleConfig, stats: Arc<IoStats>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(FileWriter {
            path,
            file,
            buffer: Vec::with_capacity(buffer_limit),
            buffer_limit,
            pos: offset,
            throttle: Throttle::new(throttle, stats),
        })
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.buffer.push(byte);
        self.pos += 1;
        self.maybe_flush()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        self.pos += bytes.len() as u64;
        self.maybe_flush()
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn zip_u32(&mut self, value: u32) -> Result<()> {
        self.zip_u64(value as u64)
    }

    /// Varint-encode one value into the stream.
    pub fn zip_u64(&mut self, value: u64) -> Result<()> {
        let start = self.buffer.len();
        VByte::encode_u64(&mut self.buffer, value);
        self.pos += (self.buffer.len() - start) as u64;
        self.maybe_flush()
    }

    /// Length-prefixed byte string (u32 length).
    pub fn write_lstring(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u32(bytes.len() as u32)?;
        self.write_bytes(bytes)
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.buffer.len() >= self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk_size = self.throttle.chunk_size();
        let mut written = 0;
        while written < self.buffer.len() {
            let end = (written + chunk_size).min(self.buffer.len());
            self.throttle.pace(end - written);
            let start = Instant::now();
            self.file.write_all(&self.buffer[written..end])?;
            self.throttle.stats.record_write((end - written) as u64, start.elapsed());
            written = end;
        }
        self.buffer.clear();
        Ok(())
    }

    /// Flush and reposition the physical write head.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.flush()?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    /// Flush buffers and push bytes to stable storage.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
