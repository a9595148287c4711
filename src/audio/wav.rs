//! WAV probing, slicing and decoding.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, SubflowError};
use std::path::{Path, PathBuf};

/// A downloaded audio file of known, positive duration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioAsset {
    /// Read the WAV header and compute the duration.
    pub fn probe(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| SubflowError::Planning {
            message: format!("Failed to read audio file {}: {}", path.display(), e),
        })?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(SubflowError::Planning {
                message: format!("Audio file {} has a zero sample rate", path.display()),
            });
        }

        // hound reports duration in frames (samples per channel)
        let duration_seconds = reader.duration() as f64 / spec.sample_rate as f64;
        if duration_seconds <= 0.0 {
            return Err(SubflowError::Planning {
                message: format!("Audio file {} is empty", path.display()),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}

/// Cuts a time range out of an audio file into a new file.
pub trait ChunkSlicer: Send + Sync {
    fn slice(&self, source: &Path, start: f64, end: f64, dest: &Path) -> Result<()>;
}

/// Slices WAV files frame-accurately, keeping the source format.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavSlicer;

impl ChunkSlicer for WavSlicer {
    fn slice(&self, source: &Path, start: f64, end: f64, dest: &Path) -> Result<()> {
        let mut reader = hound::WavReader::open(source).map_err(|e| SubflowError::Planning {
            message: format!("Failed to open {}: {}", source.display(), e),
        })?;
        let spec = reader.spec();
        let total_frames = reader.duration();

        let start_frame = seconds_to_frame(start, spec.sample_rate).min(total_frames);
        let end_frame = seconds_to_frame(end, spec.sample_rate).min(total_frames);
        if end_frame <= start_frame {
            return Err(SubflowError::Planning {
                message: format!("Empty slice [{:.3}, {:.3})", start, end),
            });
        }

        reader
            .seek(start_frame)
            .map_err(|e| SubflowError::Planning {
                message: format!("Failed to seek to {:.3}s: {}", start, e),
            })?;

        let sample_count = (end_frame - start_frame) as usize * spec.channels as usize;
        let mut writer = hound::WavWriter::create(dest, spec).map_err(|e| {
            SubflowError::Planning {
                message: format!("Failed to create {}: {}", dest.display(), e),
            }
        })?;

        let copied = match spec.sample_format {
            hound::SampleFormat::Int => {
                copy_samples::<i32, _>(&mut reader, &mut writer, sample_count)
            }
            hound::SampleFormat::Float => {
                copy_samples::<f32, _>(&mut reader, &mut writer, sample_count)
            }
        };
        copied.map_err(|e| SubflowError::Planning {
            message: format!("Failed to write slice {}: {}", dest.display(), e),
        })?;

        writer.finalize().map_err(|e| SubflowError::Planning {
            message: format!("Failed to finalize {}: {}", dest.display(), e),
        })
    }
}

fn copy_samples<S, R>(
    reader: &mut hound::WavReader<R>,
    writer: &mut hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    count: usize,
) -> std::result::Result<(), hound::Error>
where
    S: hound::Sample + Copy,
    R: std::io::Read,
{
    for sample in reader.samples::<S>().take(count) {
        writer.write_sample(sample?)?;
    }
    Ok(())
}

fn seconds_to_frame(seconds: f64, sample_rate: u32) -> u32 {
    let frame = (seconds.max(0.0) * sample_rate as f64).round();
    if frame >= u32::MAX as f64 {
        u32::MAX
    } else {
        frame as u32
    }
}

/// Decode a WAV file into mono f32 samples at 16kHz, as Whisper expects.
pub fn read_mono_f32(path: &Path) -> Result<Vec<f32>> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SubflowError::TranscriptionInferenceFailed {
            message: format!("Failed to parse WAV file {}: {}", path.display(), e),
        })?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
    }
    .map_err(|e| SubflowError::TranscriptionInferenceFailed {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    let channels = spec.channels.max(1) as usize;
    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(resample(&mono, spec.sample_rate, SAMPLE_RATE))
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
