//! Audio access for transcription: the `AudioSource` capability, an
//! in-memory PCM implementation, and WAV clip export.

use std::path::Path;

use thiserror::Error;

use crate::inference::ProviderError;

/// Size of the canonical RIFF/WAVE header written by [`wav_clip_bytes`].
pub const WAV_HEADER_LEN: usize = 44;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

#[derive(Debug, Error)]
pub enum AudioError {
    /// The requested range contains no samples.
    #[error("empty audio range {start_ms}ms..{end_ms}ms")]
    EmptyRange { start_ms: i64, end_ms: i64 },

    #[error("audio I/O error: {reason}")]
    Io { reason: String },

    #[error("unsupported audio: {reason}")]
    UnsupportedFormat { reason: String },
}

impl From<std::io::Error> for AudioError {
    fn from(e: std::io::Error) -> Self {
        AudioError::Io {
            reason: e.to_string(),
        }
    }
}

impl From<AudioError> for ProviderError {
    fn from(e: AudioError) -> Self {
        ProviderError::AudioError {
            reason: e.to_string(),
        }
    }
}

// ─── AudioSource ────────────────────────────────────────────────────────────

/// Decoded, interleaved PCM audio. A "sample" is one frame across all
/// channels.
pub trait AudioSource: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn bytes_per_sample(&self) -> u16;
    fn num_samples(&self) -> u64;

    /// Copy `count` frames starting at frame `start` into `buf`, which must
    /// hold exactly `count * channels * bytes_per_sample` bytes.
    fn fill(&self, buf: &mut [u8], start: u64, count: u64);

    fn duration_ms(&self) -> i64 {
        match self.sample_rate() {
            0 => 0,
            rate => (self.num_samples() * 1000 / u64::from(rate)) as i64,
        }
    }
}

/// In-memory PCM audio.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: u16,
    bytes_per_sample: u16,
    data: Vec<u8>,
}

impl PcmBuffer {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        bytes_per_sample: u16,
        data: Vec<u8>,
    ) -> Result<Self, AudioError> {
        if sample_rate == 0 || channels == 0 || bytes_per_sample == 0 {
            return Err(AudioError::UnsupportedFormat {
                reason: format!(
                    "rate={sample_rate} channels={channels} bytes_per_sample={bytes_per_sample}"
                ),
            });
        }
        Ok(Self {
            sample_rate,
            channels,
            bytes_per_sample,
            data,
        })
    }

    fn frame_len(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bytes_per_sample)
    }

    /// Load a PCM WAV file.
    pub fn from_wav_file(path: &Path) -> Result<Self, AudioError> {
        let bytes = std::fs::read(path)?;
        Self::from_wav_bytes(&bytes)
    }

    /// Parse a RIFF/WAVE image holding integer PCM.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(AudioError::UnsupportedFormat {
                reason: "not a RIFF/WAVE file".into(),
            });
        }

        let mut format: Option<(u16, u16, u32, u16)> = None;
        let mut offset = 12;
        while offset + 8 <= bytes.len() {
            let id = &bytes[offset..offset + 4];
            let size = read_u32(bytes, offset + 4) as usize;
            let body_start = offset + 8;
            let body_end = body_start.saturating_add(size).min(bytes.len());
            let body = &bytes[body_start..body_end];

            match id {
                b"fmt " => {
                    if body.len() < 16 {
                        return Err(AudioError::UnsupportedFormat {
                            reason: "truncated fmt chunk".into(),
                        });
                    }
                    let audio_format = read_u16(body, 0);
                    let channels = read_u16(body, 2);
                    let rate = read_u32(body, 4);
                    let bits = read_u16(body, 14);
                    format = Some((audio_format, channels, rate, bits));
                }
                b"data" => {
                    let (audio_format, channels, rate, bits) =
                        format.ok_or_else(|| AudioError::UnsupportedFormat {
                            reason: "data chunk before fmt chunk".into(),
                        })?;
                    if audio_format != WAVE_FORMAT_PCM && audio_format != WAVE_FORMAT_EXTENSIBLE {
                        return Err(AudioError::UnsupportedFormat {
                            reason: format!("WAVE format tag {audio_format} is not PCM"),
                        });
                    }
                    if bits == 0 || bits % 8 != 0 {
                        return Err(AudioError::UnsupportedFormat {
                            reason: format!("{bits}-bit samples"),
                        });
                    }
                    let mut pcm = Self::new(rate, channels, bits / 8, body.to_vec())?;
                    // Drop a trailing partial frame.
                    let whole = pcm.data.len() - pcm.data.len() % pcm.frame_len();
                    pcm.data.truncate(whole);
                    return Ok(pcm);
                }
                _ => {}
            }

            // Chunks are word-aligned.
            offset = body_start + size + (size & 1);
        }

        Err(AudioError::UnsupportedFormat {
            reason: "no data chunk".into(),
        })
    }
}

impl AudioSource for PcmBuffer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn bytes_per_sample(&self) -> u16 {
        self.bytes_per_sample
    }

    fn num_samples(&self) -> u64 {
        (self.data.len() / self.frame_len()) as u64
    }

    fn fill(&self, buf: &mut [u8], start: u64, count: u64) {
        let frame = self.frame_len();
        let from = (start as usize).saturating_mul(frame).min(self.data.len());
        let to = from
            .saturating_add((count as usize).saturating_mul(frame))
            .min(self.data.len());
        let n = (to - from).min(buf.len());
        buf[..n].copy_from_slice(&self.data[from..from + n]);
        buf[n..].fill(0);
    }
}

// ─── WAV export ─────────────────────────────────────────────────────────────

/// Frame index for a millisecond position, rounded up.
fn ms_to_sample(ms: i64, rate: u32) -> u64 {
    let ms = ms.max(0) as u64;
    (ms * u64::from(rate)).div_ceil(1000)
}

/// Encode `[start_ms, end_ms)` of `source` as a complete WAV file image.
pub fn wav_clip_bytes(
    source: &dyn AudioSource,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<u8>, AudioError> {
    let rate = source.sample_rate();
    let total = source.num_samples();
    let start = ms_to_sample(start_ms, rate).min(total);
    let end = ms_to_sample(end_ms, rate).min(total);
    if end <= start {
        return Err(AudioError::EmptyRange { start_ms, end_ms });
    }

    let channels = source.channels();
    let bps = source.bytes_per_sample();
    let block_align = u32::from(channels) * u32::from(bps);
    let count = end - start;
    let data_len = (count * u64::from(block_align)) as usize;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&(bps * 8).to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    out.resize(WAV_HEADER_LEN + data_len, 0);
    source.fill(&mut out[WAV_HEADER_LEN..], start, count);
    Ok(out)
}

/// Write `[start_ms, end_ms)` of `source` to a WAV file.
pub fn write_wav_clip(
    source: &dyn AudioSource,
    start_ms: i64,
    end_ms: i64,
    path: &Path,
) -> Result<(), AudioError> {
    let bytes = wav_clip_bytes(source, start_ms, end_ms)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 s of 16-bit mono at 1 kHz where sample `i` holds the value `i`.
    fn ramp() -> PcmBuffer {
        let data: Vec<u8> = (0..1000u16).flat_map(|i| i.to_le_bytes()).collect();
        PcmBuffer::new(1000, 1, 2, data).unwrap()
    }

    #[test]
    fn test_clip_header_and_range() {
        let clip = wav_clip_bytes(&ramp(), 100, 200).unwrap();
        assert_eq!(&clip[0..4], b"RIFF");
        assert_eq!(&clip[8..12], b"WAVE");
        assert_eq!(clip.len(), WAV_HEADER_LEN + 100 * 2);
        assert_eq!(read_u32(&clip, 40), 200);
        // First sample of the clip is sample 100.
        assert_eq!(read_u16(&clip, WAV_HEADER_LEN), 100);
    }

    #[test]
    fn test_clip_rounds_start_up() {
        let pcm = PcmBuffer::new(3, 1, 2, vec![0; 3 * 2 * 10]).unwrap();
        // 500 ms at 3 Hz = 1.5 samples, rounded up to 2.
        let clip = wav_clip_bytes(&pcm, 500, 2000).unwrap();
        assert_eq!(clip.len() - WAV_HEADER_LEN, (6 - 2) * 2);
    }

    #[test]
    fn test_clip_clamped_to_length() {
        let clip = wav_clip_bytes(&ramp(), 900, 5000).unwrap();
        assert_eq!(clip.len(), WAV_HEADER_LEN + 100 * 2);
    }

    #[test]
    fn test_empty_range_is_error() {
        assert!(matches!(
            wav_clip_bytes(&ramp(), 500, 500),
            Err(AudioError::EmptyRange { .. })
        ));
        assert!(wav_clip_bytes(&ramp(), 2000, 3000).is_err());
    }

    #[test]
    fn test_wav_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        write_wav_clip(&ramp(), 0, 1000, &path).unwrap();

        let loaded = PcmBuffer::from_wav_file(&path).unwrap();
        assert_eq!(loaded.sample_rate(), 1000);
        assert_eq!(loaded.channels(), 1);
        assert_eq!(loaded.bytes_per_sample(), 2);
        assert_eq!(loaded.num_samples(), 1000);
        assert_eq!(loaded.duration_ms(), 1000);
    }

    #[test]
    fn test_rejects_non_wav() {
        assert!(PcmBuffer::from_wav_bytes(b"ID3 not a wave file").is_err());
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let mut clip = wav_clip_bytes(&ramp(), 0, 10).unwrap();
        // Splice a LIST chunk with an odd size (padded) between fmt and data.
        let mut list = b"LIST".to_vec();
        list.extend_from_slice(&3u32.to_le_bytes());
        list.extend_from_slice(b"abc\0");
        clip.splice(36..36, list);
        let loaded = PcmBuffer::from_wav_bytes(&clip).unwrap();
        assert_eq!(loaded.num_samples(), 10);
    }
}
