//! Decoding of audio files into raw f32 frames for loop import.
//!
//! The engine itself only ever consumes already-decoded frames; every codec
//! concern lives here on the control thread.

use crate::audio::buffer::AudioBuffer;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub struct AudioFile {
    /// Interleaved f32 samples
    pub data: Vec<f32>,
    pub channels: u32,
    pub sample_rate: u32,
    pub frames: u64,
}

impl AudioFile {
    /// Load an audio file from disk and decode it to interleaved f32 samples
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();

        let file = std::fs::File::open(path).map_err(|e| format!("Failed to open file: {}", e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("Failed to probe file: {}", e))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| "No audio tracks found".to_string())?;
        let track_id = track.id;

        let codec_params = track.codec_params.clone();
        let channels = codec_params
            .channels
            .ok_or_else(|| "Channel count not specified".to_string())?
            .count() as u32;
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| "Sample rate not specified".to_string())?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Failed to create decoder: {}", e))?;

        let mut audio_data = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(Error::ResetRequired) => {
                    return Err("Decoder reset required (not supported)".to_string());
                }
                Err(e) => return Err(format!("Failed to read packet: {}", e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    if sample_buf.is_none() {
                        let spec = *decoded.spec();
                        sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = &mut sample_buf {
                        buf.copy_interleaved_ref(decoded);
                        audio_data.extend_from_slice(buf.samples());
                    }
                }
                Err(Error::DecodeError(e)) => {
                    log::warn!("decode error in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(format!("Decode failed: {}", e)),
            }
        }

        let frames = (audio_data.len() / channels as usize) as u64;
        Ok(AudioFile { data: audio_data, channels, sample_rate, frames })
    }

    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Spread the decoded frames onto a planar buffer with the engine's
    /// channel count (mono sources are duplicated, extras dropped).
    pub fn to_planar(&self, channels: usize) -> AudioBuffer {
        let frames = self.frames as usize;
        let mut out = AudioBuffer::new(channels, frames);
        for ch in 0..channels {
            let src_ch = ch.min(self.channels as usize - 1);
            for frame in 0..frames {
                out.channel_mut(ch)[frame] = self.data[frame * self.channels as usize + src_ch];
            }
        }
        out
    }
}
