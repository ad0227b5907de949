//! Media source encoding shared by the adapters.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reagent_core::Source;

/// Bits per sample of [`Source::Raw`] audio.
const PCM_BITS: u16 = 16;

/// Wrap 16-bit little-endian PCM samples in a WAV container.
pub fn pcm_to_wav(sample_rate: u32, channels: u16, pcm: &[u8]) -> Vec<u8> {
    let block_align = channels * (PCM_BITS / 8);
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&PCM_BITS.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// Inline `(media_type, base64 data)` for a source, when it has inline bytes.
///
/// `data:` URLs are decoded into their parts; remote URLs return `None`.
pub fn inline_data(source: &Source) -> Option<(String, String)> {
    match source {
        Source::Base64 { media_type, data } => Some((media_type.clone(), data.clone())),
        Source::Raw {
            sample_rate,
            channels,
            bytes,
        } => Some((
            "audio/wav".into(),
            STANDARD.encode(pcm_to_wav(*sample_rate, *channels, bytes)),
        )),
        Source::Url { url } => parse_data_url(url),
    }
}

/// A URL usable by providers that take URLs, embedding inline data.
pub fn to_url(source: &Source) -> String {
    match source {
        Source::Url { url } => url.clone(),
        other => match inline_data(other) {
            Some((media_type, data)) => format!("data:{media_type};base64,{data}"),
            None => String::new(),
        },
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    Some((media_type.to_string(), data.to_string()))
}

/// Best-effort MIME type from a URL's extension.
pub fn guess_media_type(url: &str, fallback: &str) -> String {
    if let Some((media_type, _)) = parse_data_url(url) {
        return media_type;
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mp3",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        _ => fallback,
    }
    .to_string()
}

/// Audio format name (`"wav"`, `"mp3"`) from a MIME type.
pub fn audio_format(media_type: &str) -> &str {
    match media_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        other => other.strip_prefix("audio/").unwrap_or("wav"),
    }
}
