//! Player - Buffered, Priority-Mixable Audio Output
//!
//! A `Player` owns one cpal output stream and a FIFO queue of enqueued
//! tracks. Enqueued tracks are resampled to the player's fixed sink spec up
//! front so the real-time callback never allocates or resamples.
//!
//! # Mute contract
//!
//! A muted player keeps consuming its queue in real time — cursors advance
//! and entries complete exactly as if the player were audible — it simply
//! never copies samples into the output buffer. This lets the priority
//! mixer silently unmute whichever channel should currently be heard
//! without losing playback position on the channels it mutes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig as CpalStreamConfig};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use tokio::sync::oneshot;

use crate::error::PlayerError;
use crate::track::{estimate_buffer_duration_ms, Track};

/// Fixed output format a `Player` runs its sink at.
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

struct Entry {
    /// Interleaved samples at the sink's spec.
    buffer: Vec<f32>,
    cursor: usize,
    notify: Option<oneshot::Sender<()>>,
}

struct QueueState {
    entries: VecDeque<Entry>,
    muted: bool,
    paused: bool,
}

/// A single mixable audio output channel.
pub struct Player {
    state: Arc<Mutex<QueueState>>,
    muted_flag: Arc<AtomicBool>,
    config: PlayerConfig,
    _stream: Stream,
}

impl Player {
    /// Build a player backed by `device`, started paused.
    pub fn new(device: &Device, config: PlayerConfig) -> Result<Self, PlayerError> {
        let cpal_config = CpalStreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let state = Arc::new(Mutex::new(QueueState {
            entries: VecDeque::new(),
            muted: false,
            paused: true,
        }));
        let muted_flag = Arc::new(AtomicBool::new(false));

        let cb_state = Arc::clone(&state);
        let cb_muted = Arc::clone(&muted_flag);

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    Self::fill(&cb_state, &cb_muted, data);
                },
                move |err| {
                    tracing::warn!(error = %err, "player output stream error");
                },
                None,
            )
            .map_err(|e| PlayerError::BadTrack(e.to_string()))?;

        // Players are constructed paused; the priority mixer resumes
        // whichever single player is selected for audible output.
        stream
            .pause()
            .map_err(|e| PlayerError::BadTrack(e.to_string()))?;

        Ok(Self {
            state,
            muted_flag,
            config,
            _stream: stream,
        })
    }

    /// The real-time audio callback body, factored out for testability.
    fn fill(state: &Mutex<QueueState>, muted: &AtomicBool, data: &mut [f32]) {
        data.fill(0.0);
        let mut guard = match state.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        let is_muted = muted.load(Ordering::Relaxed);

        let mut written = 0;
        let mut completed: Vec<Entry> = Vec::new();
        while written < data.len() {
            let Some(front) = guard.entries.front_mut() else {
                break;
            };
            let remaining = front.buffer.len() - front.cursor;
            let chunk = remaining.min(data.len() - written);

            if !is_muted {
                data[written..written + chunk]
                    .copy_from_slice(&front.buffer[front.cursor..front.cursor + chunk]);
            }
            front.cursor += chunk;
            written += chunk;

            if front.cursor >= front.buffer.len() {
                if let Some(done) = guard.entries.pop_front() {
                    completed.push(done);
                }
            }
        }
        drop(guard);

        for mut entry in completed {
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Resample `track` to the sink spec and append it to the queue.
    ///
    /// Resolves the returned receiver once the entry has been fully played
    /// out (or dropped via `clear`/`skip`).
    pub fn enqueue(&self, track: &Track) -> Result<oneshot::Receiver<()>, PlayerError> {
        let resampled = resample_to_sink(track, self.config)
            .map_err(|e| PlayerError::BadTrack(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.state.lock().expect("player state poisoned");
            guard.entries.push_back(Entry {
                buffer: resampled,
                cursor: 0,
                notify: Some(tx),
            });
        }
        self.resume();
        Ok(rx)
    }

    /// Drop every queued entry, resolving their promises immediately.
    pub fn clear(&self) {
        let mut guard = self.state.lock().expect("player state poisoned");
        for mut entry in guard.entries.drain(..) {
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Drop only the head-of-queue entry, resolving its promise.
    pub fn skip(&self) {
        let mut guard = self.state.lock().expect("player state poisoned");
        if let Some(mut entry) = guard.entries.pop_front() {
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send(());
            }
        }
    }

    pub fn mute(&self) {
        self.muted_flag.store(true, Ordering::Relaxed);
        self.state.lock().expect("player state poisoned").muted = true;
    }

    pub fn unmute(&self) {
        self.muted_flag.store(false, Ordering::Relaxed);
        self.state.lock().expect("player state poisoned").muted = false;
    }

    pub fn muted(&self) -> bool {
        self.muted_flag.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        let mut guard = self.state.lock().expect("player state poisoned");
        if !guard.paused {
            let _ = self._stream.pause();
            guard.paused = true;
        }
    }

    pub fn resume(&self) {
        let mut guard = self.state.lock().expect("player state poisoned");
        if guard.paused {
            let _ = self._stream.play();
            guard.paused = false;
        }
    }

    pub fn paused(&self) -> bool {
        self.state.lock().expect("player state poisoned").paused
    }

    /// Total remaining duration of everything queued, in milliseconds.
    pub fn duration_left_ms(&self) -> u64 {
        let guard = self.state.lock().expect("player state poisoned");
        let remaining_samples: usize = guard
            .entries
            .iter()
            .map(|e| e.buffer.len() - e.cursor)
            .sum();
        estimate_buffer_duration_ms(remaining_samples, self.config.channels, self.config.sample_rate)
    }
}

/// Resample and channel-adapt `track` into interleaved samples at `sink`'s spec.
fn resample_to_sink(track: &Track, sink: PlayerConfig) -> Result<Vec<f32>, String> {
    let planar = deinterleave(&track.samples, track.spec.channels);

    let resampled = if track.spec.sample_rate == sink.sample_rate {
        planar
    } else {
        let ratio = sink.sample_rate as f64 / track.spec.sample_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let chunk_size = planar.first().map(|c| c.len()).unwrap_or(0).max(1);
        let mut resampler = SincFixedIn::<f32>::new(
            ratio,
            2.0,
            params,
            chunk_size,
            track.spec.channels as usize,
        )
        .map_err(|e| e.to_string())?;
        resampler.process(&planar, None).map_err(|e| e.to_string())?
    };

    let adapted = adapt_channels(resampled, sink.channels);
    Ok(interleave(adapted))
}

fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels.max(1) as usize;
    let mut planar = vec![Vec::with_capacity(samples.len() / channels); channels];
    for (i, sample) in samples.iter().enumerate() {
        planar[i % channels].push(*sample);
    }
    planar
}

fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let frames = planar[0].len();
    let mut out = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for channel in &planar {
            out.push(channel.get(frame).copied().unwrap_or(0.0));
        }
    }
    out
}

fn adapt_channels(planar: Vec<Vec<f32>>, target: u16) -> Vec<Vec<f32>> {
    let target = target.max(1) as usize;
    if planar.len() == target {
        return planar;
    }
    if planar.len() == 1 {
        // mono -> N: duplicate the single channel
        return (0..target).map(|_| planar[0].clone()).collect();
    }
    // N -> mono/other: average into `target` channels, cycling sources
    let frames = planar[0].len();
    let mut out = vec![vec![0.0f32; frames]; target];
    for frame in 0..frames {
        let mixed: f32 = planar.iter().map(|c| c[frame]).sum::<f32>() / planar.len() as f32;
        for out_channel in out.iter_mut() {
            out_channel[frame] = mixed;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackSpec;

    #[test]
    fn test_deinterleave_interleave_roundtrip() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = deinterleave(&samples, 2);
        assert_eq!(planar, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
        assert_eq!(interleave(planar), samples);
    }

    #[test]
    fn test_adapt_mono_to_stereo() {
        let planar = vec![vec![0.5, 0.25]];
        let adapted = adapt_channels(planar, 2);
        assert_eq!(adapted, vec![vec![0.5, 0.25], vec![0.5, 0.25]]);
    }

    #[test]
    fn test_resample_same_rate_is_passthrough() {
        let track = Track::new(
            vec![0.1, 0.2, 0.3, 0.4],
            TrackSpec {
                sample_rate: 44100,
                channels: 1,
            },
        );
        let sink = PlayerConfig {
            sample_rate: 44100,
            channels: 1,
        };
        let out = resample_to_sink(&track, sink).unwrap();
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_fill_advances_muted_player_without_copying() {
        let state = Mutex::new(QueueState {
            entries: VecDeque::from([Entry {
                buffer: vec![1.0, 1.0, 1.0, 1.0],
                cursor: 0,
                notify: None,
            }]),
            muted: true,
            paused: false,
        });
        let muted = AtomicBool::new(true);
        let mut data = vec![0.0; 4];
        Player::fill(&state, &muted, &mut data);
        assert_eq!(data, vec![0.0, 0.0, 0.0, 0.0]);
        assert!(state.lock().unwrap().entries.is_empty());
    }

    #[test]
    fn test_fill_unmuted_copies_samples() {
        let state = Mutex::new(QueueState {
            entries: VecDeque::from([Entry {
                buffer: vec![0.5, 0.5],
                cursor: 0,
                notify: None,
            }]),
            muted: false,
            paused: false,
        });
        let muted = AtomicBool::new(false);
        let mut data = vec![0.0; 2];
        Player::fill(&state, &muted, &mut data);
        assert_eq!(data, vec![0.5, 0.5]);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_player_construction() {
        use cpal::traits::HostTrait;
        let host = cpal::default_host();
        if let Some(device) = host.default_output_device() {
            let player = Player::new(&device, PlayerConfig::default()).unwrap();
            assert!(player.paused());
        }
    }
}
