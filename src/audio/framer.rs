//! # Audio Framer
//!
//! Decodes inbound sample payloads and accumulates them into fixed-size windows.
//! Clients send chunks of arbitrary length; the VAD wants uniform windows, so
//! leftover samples are carried over to the next chunk.

use crate::audio::{AudioWindow, SampleEncoding};
use crate::error::MalformedInput;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode a raw little-endian sample payload into floats in `[-1.0, 1.0]`.
///
/// ## Errors:
/// - **Empty**: no bytes at all
/// - **TruncatedSample**: byte length is not a multiple of the sample width
pub fn decode_samples(data: &[u8], encoding: SampleEncoding) -> Result<Vec<f32>, MalformedInput> {
    if data.is_empty() {
        return Err(MalformedInput::Empty);
    }
    let width = encoding.width();
    if data.len() % width != 0 {
        return Err(MalformedInput::TruncatedSample {
            len: data.len(),
            sample_width: width,
        });
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / width);

    match encoding {
        SampleEncoding::F32Le => {
            while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
                samples.push(sample);
            }
        }
        SampleEncoding::S16Le => {
            while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
                samples.push(sample as f32 / 32768.0);
            }
        }
    }

    Ok(samples)
}

/// Accumulates samples into windows of exactly `window_samples`.
#[derive(Debug)]
pub struct AudioFramer {
    window_samples: usize,
    pending: Vec<f32>,
}

impl AudioFramer {
    pub fn new(window_samples: usize) -> Self {
        Self {
            window_samples,
            pending: Vec::with_capacity(window_samples),
        }
    }

    /// Append samples and return every window completed by them, in capture order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioWindow> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.window_samples;
        if complete == 0 {
            return Vec::new();
        }

        let mut windows = Vec::with_capacity(complete);
        let consumed = complete * self.window_samples;
        for chunk in self.pending[..consumed].chunks_exact(self.window_samples) {
            windows.push(AudioWindow::new(chunk.to_vec()));
        }
        self.pending.drain(..consumed);
        windows
    }

    /// Samples waiting for the next window.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_f32() {
        let data = f32_bytes(&[0.25, -0.5, 1.0]);
        let samples = decode_samples(&data, SampleEncoding::F32Le).unwrap();
        assert_eq!(samples, vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_decode_s16_scales_to_unit_range() {
        let data: Vec<u8> = [16384i16, -32768].iter().flat_map(|s| s.to_le_bytes()).collect();
        let samples = decode_samples(&data, SampleEncoding::S16Le).unwrap();
        assert_eq!(samples, vec![0.5, -1.0]);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert_eq!(
            decode_samples(&[], SampleEncoding::F32Le),
            Err(MalformedInput::Empty)
        );
        assert_eq!(
            decode_samples(&[0u8; 6], SampleEncoding::F32Le),
            Err(MalformedInput::TruncatedSample { len: 6, sample_width: 4 })
        );
        assert!(decode_samples(&[0u8; 3], SampleEncoding::S16Le).is_err());
    }

    #[test]
    fn test_framer_carries_remainder() {
        let mut framer = AudioFramer::new(4);

        assert!(framer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(framer.pending_len(), 3);

        let windows = framer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].samples(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(windows[1].samples(), &[0.5, 0.6, 0.7, 0.8]);
        assert_eq!(framer.pending_len(), 1);
    }
}
