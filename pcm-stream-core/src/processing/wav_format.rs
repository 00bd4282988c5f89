/// RIFF/WAVE helpers for 16-bit linear PCM.
///
/// Generates standard 44-byte headers and patches the size fields once
/// the amount of captured data is known.
use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, BITS_PER_SAMPLE};

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Generate a 44-byte WAV header for `format`.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  avg bytes per second
/// [32-33]  block_align
/// [34-35]  16
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_size.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Patch the RIFF chunk size (offset 4) and data size (offset 40) for
/// `data_size` bytes of samples. Sizes beyond 4 GiB saturate.
pub fn patch_sizes(header: &mut [u8], data_size: u64) {
    let data = u32::try_from(data_size).unwrap_or(u32::MAX);
    header[4..8].copy_from_slice(&data.saturating_add(36).to_le_bytes());
    header[40..44].copy_from_slice(&data.to_le_bytes());
}

/// Read back the format and data size from a 44-byte PCM header.
pub fn parse_wav_header(header: &[u8]) -> Result<(AudioFormat, u32), StreamError> {
    if header.len() < WAV_HEADER_SIZE {
        return Err(StreamError::Io(format!("wav header truncated: {} bytes", header.len())));
    }
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[36..40] != b"data" {
        return Err(StreamError::Io("not a canonical RIFF/WAVE file".into()));
    }

    let u16_at = |i: usize| u16::from_le_bytes([header[i], header[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);

    if u16_at(20) != 1 || u16_at(34) != BITS_PER_SAMPLE {
        return Err(StreamError::FormatUnsupported(format!(
            "wav format code {} with {} bits per sample",
            u16_at(20),
            u16_at(34)
        )));
    }
    Ok((AudioFormat::new(u32_at(24), u16_at(22)), u32_at(40)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(h: &[u8], i: usize) -> u32 {
        u32::from_le_bytes([h[i], h[i + 1], h[i + 2], h[i + 3]])
    }

    #[test]
    fn header_magic_and_pcm_tag() {
        let header = generate_wav_header(&AudioFormat::new(22050, 1), 0);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u32_at(&header, 16), 16);
    }

    #[test]
    fn header_44khz_stereo() {
        let header = generate_wav_header(&AudioFormat::new(44100, 2), 30000);
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 2);
        assert_eq!(u32_at(&header, 24), 44100);
        assert_eq!(u32_at(&header, 28), 176400);
        assert_eq!(u16::from_le_bytes([header[32], header[33]]), 4);
        assert_eq!(u16::from_le_bytes([header[34], header[35]]), 16);
        assert_eq!(u32_at(&header, 40), 30000);
        assert_eq!(u32_at(&header, 4), 36 + 30000);
    }

    #[test]
    fn patch_sizes_updates_both_fields() {
        let mut header = generate_wav_header(&AudioFormat::new(8000, 1), 0);
        patch_sizes(&mut header, 15000);
        assert_eq!(u32_at(&header, 40), 15000);
        assert_eq!(u32_at(&header, 4), 15036);

        patch_sizes(&mut header, u64::MAX);
        assert_eq!(u32_at(&header, 40), u32::MAX);
    }

    #[test]
    fn parse_reads_back_generated_header() {
        let format = AudioFormat::new(11025, 2);
        let header = generate_wav_header(&format, 4096);
        assert_eq!(parse_wav_header(&header).unwrap(), (format, 4096));
    }

    #[test]
    fn parse_rejects_foreign_data() {
        assert!(matches!(parse_wav_header(&[0u8; 10]), Err(StreamError::Io(_))));
        assert!(matches!(parse_wav_header(&[0u8; 44]), Err(StreamError::Io(_))));

        let mut header = generate_wav_header(&AudioFormat::new(8000, 1), 0);
        header[34] = 8;
        assert!(matches!(parse_wav_header(&header), Err(StreamError::FormatUnsupported(_))));
    }
}
