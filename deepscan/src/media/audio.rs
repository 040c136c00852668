// deepscan/src/media/audio.rs
//
// WAV loading for the lip-sync detector. Channels are averaged to mono and
// integer PCM is scaled to [-1, 1].

use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::error::MediaError;

#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub fn load_wav_mono(path: &Path) -> Result<AudioTrack, MediaError> {
    let err = |source| MediaError::Audio { path: path.to_path_buf(), source };
    let mut reader = WavReader::open(path).map_err(err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(err)?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(err)?
        }
    };

    if interleaved.is_empty() {
        return Err(MediaError::EmptyAudio(path.to_path_buf()));
    }

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(AudioTrack { samples, sample_rate: spec.sample_rate })
}
