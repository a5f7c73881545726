//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::oneshot;

use super::{AudioClip, AudioSink};
use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

enum OutputCommand {
    Play {
        pcm: Pcm,
        finished: Arc<AtomicBool>,
        started: oneshot::Sender<Result<()>>,
    },
    Stop,
}

/// The single shared playback handle on the default output device
///
/// `cpal` streams cannot move between threads, so a dedicated output thread
/// owns the live stream. Starting a clip replaces the previous one.
#[derive(Debug)]
pub struct AudioPlayback {
    commands: mpsc::Sender<OutputCommand>,
    /// Completion flag of the clip currently on the stream
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl AudioPlayback {
    /// Start the output thread; the device is opened per clip
    ///
    /// # Errors
    ///
    /// Returns error if the output thread cannot be spawned
    pub fn new() -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("parley-audio".to_string())
            .spawn(move || run_output(&receiver))?;

        Ok(Self {
            commands,
            current: Mutex::new(None),
        })
    }

    /// Name of the default output device, if the host has one
    #[must_use]
    pub fn output_device() -> Option<String> {
        cpal::default_host()
            .default_output_device()
            .and_then(|device| device.name().ok())
    }

    /// Whether a clip is still being played out
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.current()
            .as_ref()
            .is_some_and(|finished| !finished.load(Ordering::Acquire))
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<AtomicBool>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: OutputCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Audio("audio output thread stopped".to_string()))
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    /// Resolves once the output stream is running
    async fn play(&self, clip: AudioClip) -> Result<()> {
        let pcm = decode_clip(&clip)?;
        let samples = pcm.samples.len();
        let sample_rate = pcm.sample_rate;

        let finished = Arc::new(AtomicBool::new(false));
        let (started, ready) = oneshot::channel();
        self.current().take();
        self.send(OutputCommand::Play {
            pcm,
            finished: Arc::clone(&finished),
            started,
        })?;

        ready
            .await
            .map_err(|_| Error::Audio("audio output thread stopped".to_string()))??;

        *self.current() = Some(finished);
        tracing::debug!(samples, sample_rate, content_type = %clip.content_type, "playback started");
        Ok(())
    }

    async fn stop(&self) {
        if self.current().take().is_some() {
            tracing::debug!("playback stopped");
        }
        if let Err(e) = self.send(OutputCommand::Stop) {
            tracing::warn!(error = %e, "failed to stop playback");
        }
    }
}

/// Output thread: owns at most one live stream
fn run_output(commands: &mpsc::Receiver<OutputCommand>) {
    let mut stream: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        if let Some(previous) = stream.take() {
            if let Err(e) = previous.pause() {
                tracing::debug!(error = %e, "failed to pause stream");
            }
        }

        if let OutputCommand::Play {
            pcm,
            finished,
            started,
        } = command
        {
            let result = match open_stream(pcm, finished) {
                Ok(opened) => {
                    stream = Some(opened);
                    Ok(())
                }
                Err(e) => Err(e),
            };
            let _ = started.send(result);
        }
    }
}

fn open_stream(pcm: Pcm, finished: Arc<AtomicBool>) -> Result<Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let (config, samples) = output_config(&device, pcm)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels,
        "opening output stream"
    );

    let mut position = 0usize;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    if position < samples.len() {
                        position += 1;
                    } else {
                        finished.store(true, Ordering::Release);
                    }
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Pick a float output config at the clip's rate, resampling if the device has none
fn output_config(device: &Device, pcm: Pcm) -> Result<(StreamConfig, Vec<f32>)> {
    let rate = SampleRate(pcm.sample_rate);
    let fits = |range: &SupportedStreamConfigRange| {
        range.sample_format() == SampleFormat::F32
            && range.channels() <= 2
            && range.min_sample_rate() <= rate
            && range.max_sample_rate() >= rate
    };

    let native = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(fits)
        .min_by_key(SupportedStreamConfigRange::channels);
    if let Some(range) = native {
        return Ok((range.with_sample_rate(rate).config(), pcm.samples));
    }

    let config = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?
        .config();
    let samples = resample(&pcm.samples, pcm.sample_rate, config.sample_rate.0)?;
    Ok((config, samples))
}

/// Resample mono audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::new();
    for chunk in samples.chunks(chunk_size) {
        // Zero-pad the tail so it is not dropped
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

/// Decode a synthesized clip to mono samples
///
/// WAV is read with `hound`; anything else is treated as MP3.
///
/// # Errors
///
/// Returns error if the clip cannot be decoded or holds no audio
pub fn decode_clip(clip: &AudioClip) -> Result<Pcm> {
    let media_type = clip
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let pcm = match media_type.as_str() {
        "audio/wav" | "audio/wave" | "audio/x-wav" => decode_wav(&clip.data)?,
        _ => decode_mp3(&clip.data)?,
    };

    if pcm.samples.is_empty() {
        return Err(Error::Audio(format!("{media_type} clip contains no audio")));
    }
    Ok(pcm)
}

fn decode_mp3(data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate)
                    .map_err(|_| Error::Audio("invalid MP3 sample rate".to_string()))?;
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels));
            }
            // ID3 tags and padding between frames
            Err(minimp3::Error::SkippedData) => {}
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<Pcm> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect()
        }
    };
    let interleaved = interleaved.map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;

    Ok(Pcm {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_clip(channels: u16, frames: &[i16]) -> AudioClip {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in frames {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioClip::new(cursor.into_inner(), "audio/wav")
    }

    #[test]
    fn wav_is_decoded_to_mono() {
        let pcm = decode_clip(&wav_clip(2, &[16384, 0, -16384, -16384])).unwrap();

        assert_eq!(pcm.sample_rate, 22050);
        assert_eq!(pcm.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn undecodable_mp3_is_audio_error() {
        let clip = AudioClip::new(b"Nice to meet you.".to_vec(), "audio/mpeg");
        assert!(matches!(decode_clip(&clip), Err(Error::Audio(_))));
    }

    #[test]
    fn empty_clip_is_audio_error() {
        assert!(matches!(
            decode_clip(&AudioClip::new(Vec::new(), "audio/mpeg")),
            Err(Error::Audio(_))
        ));
        assert!(matches!(
            decode_clip(&AudioClip::new(Vec::new(), "audio/wav")),
            Err(Error::Audio(_))
        ));
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let mut clip = wav_clip(1, &[0, 8192]);
        clip.content_type = "Audio/WAV; codecs=1".to_string();
        assert_eq!(decode_clip(&clip).unwrap().samples.len(), 2);
    }

    #[tokio::test]
    async fn bad_clip_fails_before_touching_the_device() {
        let playback = AudioPlayback::new().unwrap();

        let err = playback
            .play(AudioClip::new(b"not audio".to_vec(), "audio/mpeg"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Audio(_)));
        assert!(!playback.is_playing());
    }

    #[tokio::test]
    async fn stop_without_clip_is_harmless() {
        let playback = AudioPlayback::new().unwrap();
        playback.stop().await;
        assert!(!playback.is_playing());
    }
}
