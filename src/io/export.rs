//! Loop export: snapshots go to disk as 16-bit PCM WAV at the engine's
//! sample rate.

use crate::audio::buffer::AudioBuffer;
use std::path::Path;

/// Write the first `frames` of `buffer` as a multi-channel 16-bit PCM WAV.
pub fn write_wav(
    path: impl AsRef<Path>,
    buffer: &AudioBuffer,
    frames: usize,
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let channels = buffer.num_channels();
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let n = frames.min(buffer.num_frames());
    for frame in 0..n {
        for ch in 0..channels {
            let sample = buffer.channel(ch)[frame].clamp(-1.0, 1.0);
            writer.write_sample((sample * i16::MAX as f32) as i16)?;
        }
    }
    writer.finalize()
}

/// Read a 16-bit PCM WAV back into a planar buffer. Returns the buffer and
/// its sample rate.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(AudioBuffer, u32), hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let frames = reader.len() as usize / channels;

    let mut buffer = AudioBuffer::new(channels, frames);
    for (i, sample) in reader.samples::<i16>().enumerate() {
        let sample = sample?;
        let frame = i / channels;
        let ch = i % channels;
        buffer.channel_mut(ch)[frame] = sample as f32 / i16::MAX as f32;
    }
    Ok((buffer, spec.sample_rate))
}
