//! WAV decoding: turns uploaded track bytes into a `pa_core::Track`.

use std::io::Cursor;

use pa_core::{Track, TrackSpec};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("could not decode WAV data: {0}")]
pub struct WavError(String);

/// Decode a WAV byte buffer into interleaved `f32` samples at its native spec.
pub fn decode(bytes: &[u8]) -> Result<Track, WavError> {
    let cursor = Cursor::new(bytes);
    let mut reader = hound::WavReader::new(cursor).map_err(|e| WavError(e.to_string()))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect()
        }
    };
    let samples = samples.map_err(|e| WavError(e.to_string()))?;

    Ok(Track::new(
        samples,
        TrackSpec {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    fn make_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buffer = Vec::new();
        {
            let cursor = IoCursor::new(&mut buffer);
            let mut writer = hound::WavWriter::new(cursor, spec).unwrap();
            for sample in samples {
                writer.write_sample(*sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        buffer
    }

    #[test]
    fn test_decode_mono_16bit() {
        let bytes = make_wav(&[0, i16::MAX, i16::MIN, 0], 44100, 1);
        let track = decode(&bytes).unwrap();
        assert_eq!(track.spec.sample_rate, 44100);
        assert_eq!(track.spec.channels, 1);
        assert_eq!(track.samples.len(), 4);
        assert!((track.samples[1] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"not a wav file").is_err());
    }
}
