//! # Utterance Assembler
//!
//! Converts a finalized utterance buffer into the payload the transcription
//! service uploads: a mono 16-bit PCM WAV file at the session sample rate.

use crate::audio::segmenter::Utterance;
use std::io::{self, Cursor};

#[derive(Debug, Clone, Copy)]
pub struct UtteranceAssembler {
    sample_rate: u32,
}

impl UtteranceAssembler {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Concatenate the windows in capture order and encode them as WAV.
    ///
    /// Returns `Ok(None)` for an empty utterance so no transcription call is made.
    pub fn finalize(&self, utterance: Utterance) -> io::Result<Option<Vec<u8>>> {
        if utterance.is_empty() {
            return Ok(None);
        }

        let mut pcm = Vec::with_capacity(utterance.sample_count());
        for window in &utterance.windows {
            pcm.extend(window.samples().iter().map(|&s| float_to_pcm(s)));
        }
        if pcm.is_empty() {
            return Ok(None);
        }

        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let mut out = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
        wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut out)?;
        Ok(Some(out.into_inner()))
    }
}

/// Scale a `[-1.0, 1.0]` sample to 16-bit PCM, clamping out-of-range input.
fn float_to_pcm(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioWindow;

    #[test]
    fn empty_utterance_yields_nothing() {
        let assembler = UtteranceAssembler::new(16000);
        assert!(assembler.finalize(Utterance::default()).unwrap().is_none());
    }

    #[test]
    fn windows_are_concatenated_in_order() {
        let assembler = UtteranceAssembler::new(16000);
        let utterance = Utterance {
            windows: vec![
                AudioWindow::new(vec![0.0, 0.5]),
                AudioWindow::new(vec![-0.5, 2.0]),
            ],
        };

        let bytes = assembler.finalize(utterance).unwrap().expect("payload");
        let (header, data) = wav::read(&mut Cursor::new(bytes)).unwrap();

        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.bits_per_sample, 16);
        match data {
            wav::BitDepth::Sixteen(samples) => {
                assert_eq!(samples, vec![0, 16383, -16383, 32767]);
            }
            other => panic!("unexpected bit depth: {:?}", other),
        }
    }
}
