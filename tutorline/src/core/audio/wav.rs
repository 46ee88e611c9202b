//! PCM container encoder.
//!
//! The realtime endpoint streams headerless PCM 16-bit little-endian mono at
//! 24kHz. Audio sinks need a self-describing container, so each chunk is
//! wrapped in a canonical 44-byte RIFF/WAVE header.

use base64::prelude::*;

use crate::errors::{CallError, CallResult};

/// Size of the canonical PCM WAV header.
pub const HEADER_SIZE: usize = 44;

/// Sample rate of realtime audio.
pub const SAMPLE_RATE: u32 = 24000;

/// Channel count of realtime audio.
pub const CHANNELS: u16 = 1;

/// Bit depth of realtime audio.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Bytes of audio per second at the realtime format.
pub const BYTE_RATE: u32 = SAMPLE_RATE * CHANNELS as u32 * BITS_PER_SAMPLE as u32 / 8;

/// Wrap raw PCM16 mono 24kHz bytes in a WAV container.
///
/// Pure and deterministic: identical input yields byte-identical output.
pub fn wrap(pcm_data: &[u8]) -> Vec<u8> {
    create_wav(pcm_data, SAMPLE_RATE, CHANNELS)
}

/// Decode a base64 delta and wrap it.
///
/// Returns `ParseError` when the payload is not valid base64.
pub fn wrap_base64(encoded: &str) -> CallResult<Vec<u8>> {
    let pcm = BASE64_STANDARD
        .decode(encoded)
        .map_err(|e| CallError::ParseError(format!("invalid base64 audio: {}", e)))?;
    Ok(wrap(&pcm))
}

/// Build a container for 16-bit PCM at any rate and channel count.
pub fn create_wav(pcm_data: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut wav = Vec::with_capacity(HEADER_SIZE + pcm_data.len());
    wav.extend_from_slice(&header(pcm_data.len() as u32, sample_rate, channels));
    wav.extend_from_slice(pcm_data);
    wav
}

/// Canonical header: RIFF chunk, 16-byte `fmt ` chunk, then the `data`
/// chunk length. Offsets match the ones [`container_duration`] reads.
fn header(data_len: u32, sample_rate: u32, channels: u16) -> [u8; HEADER_SIZE] {
    let block_align = channels * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(b"RIFF");
    out[4..8].copy_from_slice(&(data_len + HEADER_SIZE as u32 - 8).to_le_bytes());
    out[8..12].copy_from_slice(b"WAVE");
    out[12..16].copy_from_slice(b"fmt ");
    out[16..20].copy_from_slice(&16u32.to_le_bytes());
    out[20..22].copy_from_slice(&1u16.to_le_bytes()); // linear PCM
    out[22..24].copy_from_slice(&channels.to_le_bytes());
    out[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    out[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    out[32..34].copy_from_slice(&block_align.to_le_bytes());
    out[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out[36..40].copy_from_slice(b"data");
    out[40..44].copy_from_slice(&data_len.to_le_bytes());
    out
}

/// Playback duration of a container produced by [`wrap`].
///
/// Reads the byte rate and data size from the header; returns `None` if the
/// buffer is not a canonical PCM WAV.
pub fn container_duration(container: &[u8]) -> Option<std::time::Duration> {
    if container.len() < HEADER_SIZE
        || &container[0..4] != b"RIFF"
        || &container[8..12] != b"WAVE"
        || &container[36..40] != b"data"
    {
        return None;
    }
    let byte_rate = u32::from_le_bytes(container[28..32].try_into().ok()?);
    let data_size = u32::from_le_bytes(container[40..44].try_into().ok()?);
    if byte_rate == 0 {
        return None;
    }
    Some(std::time::Duration::from_secs_f64(
        f64::from(data_size) / f64::from(byte_rate),
    ))
}
