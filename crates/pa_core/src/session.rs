//! Speaker Session Layer - Name-Addressed Channels with Keep-Alive Expiry
//!
//! Wraps an `AmplifierController` with a name→index mapping (so HTTP callers
//! address channels by the names given in configuration) and a keep-alive
//! reaper: any channel left un-prolonged for `KEEPALIVE` is reclaimed
//! automatically, the same tick-driven idiom the amplifier controller uses
//! for its own reconciliation, just running on a longer fuse.
//!
//! Session methods pre-check channel state before delegating to the
//! amplifier controller so callers (the HTTP layer) see the specific
//! `ChannelOpened` / `ChannelClosed` / `ChannelInactive` variant the state
//! mismatch corresponds to, rather than a generic transition error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::amplifier::{ActivationOutcome, AmplifierController, ChannelState};
use crate::error::{AmplifierError, PlayerError, SessionError};
use crate::track::Track;

/// How long a channel may go un-prolonged before the reaper reclaims it.
pub const KEEPALIVE: Duration = Duration::from_millis(1000);

const REAPER_TICK: Duration = Duration::from_millis(100);

pub struct SpeakerSession {
    amplifier: Arc<AmplifierController>,
    indices: HashMap<String, usize>,
    deadlines: Arc<Mutex<HashMap<usize, Instant>>>,
    wake: Sender<()>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerSession {
    /// `channels` lists channel names in priority order (index 0 = lowest
    /// priority), matching the amplifier controller's channel count.
    pub fn new(amplifier: Arc<AmplifierController>, channels: Vec<String>) -> Self {
        let indices = channels
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        let deadlines = Arc::new(Mutex::new(HashMap::new()));

        let (wake_tx, wake_rx) = bounded(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_amplifier = Arc::clone(&amplifier);
        let thread_deadlines = Arc::clone(&deadlines);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pa-session-reaper".into())
            .spawn(move || {
                Self::reaper_loop(thread_amplifier, thread_deadlines, wake_rx, thread_shutdown)
            })
            .expect("failed to spawn session reaper thread");

        Self {
            amplifier,
            indices,
            deadlines,
            wake: wake_tx,
            shutdown,
            thread: Some(handle),
        }
    }

    fn index(&self, name: &str) -> Result<usize, SessionError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| SessionError::ChannelNotFound(name.to_string()))
    }

    pub fn open(&self, name: &str) -> Result<(), SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Closed {
            return Err(SessionError::ChannelOpened);
        }
        self.amplifier.open(index)?;
        self.deadlines.lock().insert(index, Instant::now() + KEEPALIVE);
        let _ = self.wake.try_send(());
        Ok(())
    }

    /// Reset the keep-alive deadline. Valid for any non-`Closed` channel.
    pub fn prolong(&self, name: &str) -> Result<(), SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? == ChannelState::Closed {
            return Err(SessionError::ChannelClosed);
        }
        self.deadlines.lock().insert(index, Instant::now() + KEEPALIVE);
        Ok(())
    }

    /// Force-close a channel immediately. Not HTTP-routed; used internally
    /// by the reaper's "another channel is still active" fast path.
    pub fn close(&self, name: &str) -> Result<(), SessionError> {
        let index = self.index(name)?;
        self.amplifier.close(index)?;
        self.deadlines.lock().remove(&index);
        Ok(())
    }

    pub fn activate(
        &self,
        name: &str,
        urgent: bool,
    ) -> Result<oneshot::Receiver<ActivationOutcome>, SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Opened {
            return Err(SessionError::ChannelClosed);
        }
        let rx = self.amplifier.activate(index, urgent)?;
        self.deadlines.lock().insert(index, Instant::now() + KEEPALIVE);
        Ok(rx)
    }

    /// `urgent` is accepted for API parity with the HTTP surface but does
    /// not change behavior — see the open question on urgent deactivation
    /// recorded in the design notes.
    pub fn deactivate(&self, name: &str, _urgent: bool) -> Result<oneshot::Receiver<()>, SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Active {
            return Err(SessionError::ChannelInactive);
        }
        Ok(self.amplifier.deactivate(index)?)
    }

    pub fn enqueue(&self, name: &str, track: &Track) -> Result<oneshot::Receiver<()>, SessionError> {
        let index = self.index(name)?;
        match self.amplifier.state(index)? {
            ChannelState::Closed => return Err(SessionError::ChannelClosed),
            ChannelState::Active => {}
            _ => return Err(SessionError::ChannelInactive),
        }
        self.deadlines.lock().insert(index, Instant::now() + KEEPALIVE);
        match self.amplifier.enqueue(index, track) {
            Ok(rx) => Ok(rx),
            Err(AmplifierError::Player(PlayerError::BadTrack(_))) => {
                Err(SessionError::IncompatibleTrack)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear(&self, name: &str) -> Result<(), SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Active {
            return Err(SessionError::ChannelInactive);
        }
        Ok(self.amplifier.clear(index)?)
    }

    pub fn skip(&self, name: &str) -> Result<(), SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Active {
            return Err(SessionError::ChannelInactive);
        }
        Ok(self.amplifier.skip(index)?)
    }

    pub fn duration_left(&self, name: &str) -> Result<u64, SessionError> {
        let index = self.index(name)?;
        if self.amplifier.state(index)? != ChannelState::Active {
            return Err(SessionError::ChannelInactive);
        }
        Ok(self.amplifier.duration_left(index)?)
    }

    /// Max remaining queue duration across every channel — every enabled
    /// channel drains its queue concurrently in real time (muted channels
    /// included, per the mute-but-consume contract), so the aggregate is
    /// the longest remaining channel, not the sum of all of them.
    pub fn aggregate_duration_left(&self) -> u64 {
        self.amplifier.aggregate_duration_left()
    }

    pub fn state(&self, name: &str) -> Result<ChannelState, SessionError> {
        let index = self.index(name)?;
        Ok(self.amplifier.state(index)?)
    }

    pub fn activation_duration_ms(&self, urgent: bool) -> u64 {
        self.amplifier.activation_duration_ms(urgent)
    }

    pub fn deactivation_duration_ms(&self, urgent: bool) -> u64 {
        self.amplifier.deactivation_duration_ms(urgent)
    }

    /// Whether any channel is doing anything at all (not `Closed`).
    pub fn working(&self) -> bool {
        (0..self.amplifier.channels()).any(|i| {
            self.amplifier
                .state(i)
                .map(|s| s != ChannelState::Closed)
                .unwrap_or(false)
        })
    }

    fn reaper_loop(
        amplifier: Arc<AmplifierController>,
        deadlines: Arc<Mutex<HashMap<usize, Instant>>>,
        wake: Receiver<()>,
        shutdown: Arc<AtomicBool>,
    ) {
        info!("session reaper thread started");
        while !shutdown.load(Ordering::SeqCst) {
            match wake.recv_timeout(REAPER_TICK) {
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    Self::reap(&amplifier, &deadlines);
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("session reaper thread stopped");
    }

    fn reap(amplifier: &Arc<AmplifierController>, deadlines: &Arc<Mutex<HashMap<usize, Instant>>>) {
        let now = Instant::now();
        let expired: Vec<usize> = {
            let mut guard = deadlines.lock();
            let expired = guard
                .iter()
                .filter(|(_, deadline)| now >= **deadline)
                .map(|(index, _)| *index)
                .collect::<Vec<_>>();
            for index in &expired {
                guard.remove(index);
            }
            expired
        };

        for index in expired {
            let other_active = (0..amplifier.channels())
                .filter(|&j| j != index)
                .any(|j| matches!(amplifier.state(j), Ok(ChannelState::Active)));

            if other_active {
                // The chassis stays powered for someone else regardless;
                // drop this channel straight to Closed.
                debug!(channel = index, "keep-alive expired, closing immediately");
                if let Err(e) = amplifier.close(index) {
                    warn!(channel = index, error = %e, "failed to close expired channel");
                }
            } else {
                // This may be the last channel keeping the relay powered;
                // terminate waits for the relay to actually de-energize.
                debug!(channel = index, "keep-alive expired, terminating");
                if let Err(e) = amplifier.terminate(index) {
                    warn!(channel = index, error = %e, "failed to terminate expired channel");
                }
            }
        }
    }
}

impl Drop for SpeakerSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.wake.clone());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("session reaper thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lookup_unknown_name() {
        let indices: HashMap<String, usize> = HashMap::new();
        assert!(indices.get("missing").is_none());
    }

    #[test]
    fn test_keepalive_constant_is_one_second() {
        assert_eq!(KEEPALIVE, Duration::from_millis(1000));
    }
}
