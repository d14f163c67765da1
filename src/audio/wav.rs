// Minimal PCM WAV container codec
//
// The recorder writes a canonical 44-byte header up front with both size
// fields zeroed, appends raw PCM after it, and patches the two size fields
// in place as the payload grows. A file interrupted between patches is still
// a valid WAV; it just under-reports its payload.

use std::io::{self, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

/// Length of the canonical RIFF/fmt/data header
pub const HEADER_LEN: u64 = 44;

/// Largest payload whose RIFF size (`36 + data_size`) still fits in a u32
pub const MAX_DATA_SIZE: u64 = u32::MAX as u64 - 36;

const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;
const PCM_FORMAT_TAG: u16 = 1;

/// PCM stream parameters written into the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    fn checked_block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.bits_per_sample / 8)
    }

    fn checked_byte_rate(&self) -> Option<u32> {
        self.checked_block_align()
            .and_then(|align| self.sample_rate.checked_mul(u32::from(align)))
    }

    /// Bytes per interleaved sample frame (saturates for formats `validate` rejects)
    pub fn block_align(&self) -> u16 {
        self.checked_block_align().unwrap_or(u16::MAX)
    }

    /// Bytes per second (saturates for formats `validate` rejects)
    pub fn byte_rate(&self) -> u32 {
        self.checked_byte_rate().unwrap_or(u32::MAX)
    }

    /// Playback duration of `data_size` payload bytes
    pub fn duration_secs(&self, data_size: u64) -> f64 {
        match self.byte_rate() {
            0 => 0.0,
            rate => data_size as f64 / rate as f64,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be non-zero".to_string());
        }
        if self.channels == 0 {
            return Err("channel count must be non-zero".to_string());
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 || self.bits_per_sample > 32 {
            return Err(format!(
                "bits per sample must be 8, 16, 24 or 32 (got {})",
                self.bits_per_sample
            ));
        }
        if self.checked_block_align().is_none() {
            return Err(format!(
                "{} channels of {}-bit samples exceed the WAV block align limit",
                self.channels, self.bits_per_sample
            ));
        }
        if self.checked_byte_rate().is_none() {
            return Err(format!(
                "{}Hz exceeds the WAV byte rate limit for {} channels of {}-bit samples",
                self.sample_rate, self.channels, self.bits_per_sample
            ));
        }
        Ok(())
    }

    /// Equivalent hound spec, for reading recordings back
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Serialize the full header for a payload of `data_size` bytes
pub fn encode_header(format: &PcmFormat, data_size: u32) -> [u8; HEADER_LEN as usize] {
    let mut header = [0u8; HEADER_LEN as usize];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size(data_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Write a header with zeroed size fields at the current position.
///
/// Returns the offset of the first payload byte.
pub fn write_initial_header<W: Write + Seek>(writer: &mut W, format: &PcmFormat) -> io::Result<u64> {
    if let Err(reason) = format.validate() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, reason));
    }

    writer.write_all(&encode_header(format, 0))?;
    writer.stream_position()
}

/// Rewrite the RIFF and data size fields for `data_size` payload bytes.
///
/// The write cursor is restored afterwards, so appends continue where they
/// left off. Patching twice with the same size yields the same header.
pub fn patch_sizes<W: Write + Seek>(writer: &mut W, data_size: u64) -> io::Result<()> {
    let data_size = u32::try_from(data_size)
        .ok()
        .filter(|&size| size as u64 <= MAX_DATA_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds the WAV size limit", data_size),
            )
        })?;

    let resume_at = writer.stream_position()?;

    writer.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    writer.write_all(&riff_size(data_size).to_le_bytes())?;

    writer.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    writer.write_all(&data_size.to_le_bytes())?;

    writer.seek(SeekFrom::Start(resume_at))?;
    Ok(())
}

fn riff_size(data_size: u32) -> u32 {
    data_size.saturating_add(36)
}
