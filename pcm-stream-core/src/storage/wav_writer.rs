use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::StreamError;
use crate::models::format::AudioFormat;
use crate::processing::wav_format;
use crate::traits::sink::SampleSink;

/// Streaming WAV writer for captured blocks.
///
/// ```text
/// [44-byte WAV header, sizes patched on close]
/// [16-bit little-endian PCM ...]
/// ```
/// Implements [`SampleSink`], so it can be handed straight to
/// `Recorder::record`.
pub struct WavFileWriter {
    file_path: PathBuf,
    format: AudioFormat,
    file: Option<BufWriter<File>>,
    data_bytes: u64,
    scratch: Vec<u8>,
}

impl WavFileWriter {
    pub fn new(file_path: impl Into<PathBuf>, format: AudioFormat) -> Self {
        Self {
            file_path: file_path.into(),
            format,
            file: None,
            data_bytes: 0,
            scratch: Vec::new(),
        }
    }

    /// Create the file and write a placeholder header.
    pub fn open(&mut self) -> Result<(), StreamError> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StreamError::Io(format!("failed to create directory: {}", e)))?;
        }
        let file = File::create(&self.file_path)
            .map_err(|e| StreamError::Io(format!("failed to create {}: {}", self.file_path.display(), e)))?;

        let mut file = BufWriter::new(file);
        file.write_all(&wav_format::generate_wav_header(&self.format, 0))?;
        self.file = Some(file);
        self.data_bytes = 0;
        log::debug!("opened {} for {}", self.file_path.display(), self.format);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append interleaved samples.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<(), StreamError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StreamError::InvalidState("wav file is not open".into()))?;

        self.scratch.clear();
        self.scratch.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        file.write_all(&self.scratch)
            .map_err(|e| StreamError::Io(format!("write failed: {}", e)))?;
        self.data_bytes += self.scratch.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, flush, and return the SHA-256 of the file.
    pub fn close(&mut self) -> Result<String, StreamError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StreamError::InvalidState("wav file is not open".into()))?;

        let mut header = wav_format::generate_wav_header(&self.format, 0);
        wav_format::patch_sizes(&mut header, self.data_bytes);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.flush()?;
        drop(file);

        let checksum = sha256_file(&self.file_path)?;
        log::info!(
            "closed {} ({} data bytes, sha256 {})",
            self.file_path.display(),
            self.data_bytes,
            checksum
        );
        Ok(checksum)
    }

    /// Sample bytes written so far, excluding the header.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl SampleSink for WavFileWriter {
    fn deliver_samples(&mut self, buffer: &[i16], offset: usize, count: usize) -> Result<(), StreamError> {
        let block = offset
            .checked_add(count)
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| StreamError::InvalidState(format!("block {}+{} outside batch", offset, count)))?;
        self.write_samples(block)
    }
}

/// SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, StreamError> {
    let data = fs::read(path).map_err(|e| StreamError::Io(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
