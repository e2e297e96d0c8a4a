//! Amplifier Controller - Channel State Machine and Reconciliation Loop
//!
//! The `AmplifierController` owns the power relay and the priority mixer
//! and drives every channel through its warm-up/cool-down lifecycle. State
//! mutations requested from the HTTP layer (`activate`, `deactivate`,
//! `terminate`, ...) only record intent; a background thread reconciles
//! intent against elapsed time on a fixed tick, exactly the way the
//! original audio engine's background thread reconciled command state on
//! its own tick rather than mutating hardware inline from the calling
//! thread.
//!
//! # Reconciliation
//!
//! Every tick:
//! 1. Channels in `PendingActivation` whose warm condition now holds move
//!    to `Active` and resolve their activation promise.
//! 2. Channels in `PendingDeactivation` drop to `Opened` and resolve their
//!    deactivation promise.
//! 3. The relay is energized if any channel needs power
//!    (`PendingActivation`, `Active`, `PendingTermination`) and not
//!    already energized, or de-energized if none do and it still is.
//! 4. Channels in `PendingTermination` drop to `Closed` once the relay is
//!    confirmed de-energized, and resolve their termination promise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{AmplifierError, PlayerError};
use crate::mixer::PriorityMixer;
use crate::player::PlayerConfig;
use crate::track::Track;
use cpal::Device;
use pa_relay::PowerRelay;

/// A single channel's position in its activation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opened,
    PendingActivation,
    Active,
    PendingDeactivation,
    PendingTermination,
}

/// Outcome delivered to an `activate` caller once its promise resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The channel reached `Active`.
    Success,
    /// A `deactivate`/`terminate` superseded this activation first.
    Cancelled,
}

struct ChannelRecord {
    state: ChannelState,
    activation_started_at: Option<Instant>,
    urgent: bool,
    activation_listeners: Vec<oneshot::Sender<ActivationOutcome>>,
    deactivation_listeners: Vec<oneshot::Sender<()>>,
}

impl ChannelRecord {
    fn new() -> Self {
        Self {
            state: ChannelState::Closed,
            activation_started_at: None,
            urgent: false,
            activation_listeners: Vec::new(),
            deactivation_listeners: Vec::new(),
        }
    }

    fn resolve_activation(&mut self, outcome: ActivationOutcome) {
        for tx in self.activation_listeners.drain(..) {
            let _ = tx.send(outcome);
        }
    }

    fn resolve_deactivation(&mut self) {
        for tx in self.deactivation_listeners.drain(..) {
            let _ = tx.send(());
        }
    }
}

struct Shared {
    relay: PowerRelay,
    mixer: Mutex<PriorityMixer>,
    channels: Mutex<Vec<ChannelRecord>>,
    last_powered_interval_end: Mutex<Option<Instant>>,
    warming: Duration,
    cooling: Duration,
}

/// Drives the relay and the channel mixer through the warm-up/cool-down
/// state machine on a fixed tick.
pub struct AmplifierController {
    shared: Arc<Shared>,
    wake: Sender<()>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AmplifierController {
    pub fn new(
        relay: PowerRelay,
        device: &Device,
        channel_count: usize,
        warming: Duration,
        cooling: Duration,
        tick: Duration,
    ) -> Result<Self, PlayerError> {
        let mixer = PriorityMixer::new(device, channel_count, PlayerConfig::default())?;
        let shared = Arc::new(Shared {
            relay,
            mixer: Mutex::new(mixer),
            channels: Mutex::new((0..channel_count).map(|_| ChannelRecord::new()).collect()),
            last_powered_interval_end: Mutex::new(None),
            warming,
            cooling,
        });

        let (wake_tx, wake_rx) = bounded(channel_count.max(1) * 4);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shared = Arc::clone(&shared);
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pa-amplifier".into())
            .spawn(move || Self::reconcile_loop(thread_shared, wake_rx, thread_shutdown, tick))
            .expect("failed to spawn amplifier reconciliation thread");

        Ok(Self {
            shared,
            wake: wake_tx,
            shutdown,
            thread: Some(handle),
        })
    }

    pub fn channels(&self) -> usize {
        self.shared.channels.lock().expect("channels poisoned").len()
    }

    pub fn powered(&self) -> bool {
        self.shared.relay.closed()
    }

    pub fn state(&self, index: usize) -> Result<ChannelState, AmplifierError> {
        let channels = self.shared.channels.lock().expect("channels poisoned");
        channels
            .get(index)
            .map(|c| c.state)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))
    }

    /// The configured warm-up duration, or zero if `urgent` bypasses it.
    pub fn activation_duration_ms(&self, urgent: bool) -> u64 {
        if urgent {
            0
        } else {
            self.shared.warming.as_millis() as u64
        }
    }

    /// The configured cool-down/shutdown duration, or zero if `urgent`
    /// bypasses it. Per the open question on urgent deactivation recorded
    /// in the design notes, urgency does not otherwise change behavior.
    pub fn deactivation_duration_ms(&self, urgent: bool) -> u64 {
        if urgent {
            0
        } else {
            self.shared.cooling.as_millis() as u64
        }
    }

    pub fn open(&self, index: usize) -> Result<(), AmplifierError> {
        let mut channels = self.shared.channels.lock().expect("channels poisoned");
        let record = channels
            .get_mut(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))?;
        if record.state != ChannelState::Closed {
            return Err(AmplifierError::InvalidTransition(record.state));
        }
        record.state = ChannelState::Opened;
        Ok(())
    }

    /// Force a channel straight to `Closed`, cancelling any outstanding
    /// activation and resolving any outstanding deactivation listeners.
    ///
    /// Unlike `terminate`, this does not wait for the relay: callers use it
    /// only when they already know another channel will keep the chassis
    /// powered (see the session reaper's "another channel is still active"
    /// fast path).
    pub fn close(&self, index: usize) -> Result<(), AmplifierError> {
        let mut channels = self.shared.channels.lock().expect("channels poisoned");
        let mut mixer = self.shared.mixer.lock().expect("mixer poisoned");
        let record = channels
            .get_mut(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))?;
        if record.state == ChannelState::Closed {
            return Err(AmplifierError::InvalidTransition(record.state));
        }
        record.resolve_activation(ActivationOutcome::Cancelled);
        record.state = ChannelState::Closed;
        record.resolve_deactivation();
        mixer.disable(index);
        Ok(())
    }

    pub fn activate(
        &self,
        index: usize,
        urgent: bool,
    ) -> Result<oneshot::Receiver<ActivationOutcome>, AmplifierError> {
        let mut channels = self.shared.channels.lock().expect("channels poisoned");
        let record = channels
            .get_mut(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))?;
        if record.state != ChannelState::Opened {
            return Err(AmplifierError::InvalidTransition(record.state));
        }
        record.state = ChannelState::PendingActivation;
        record.activation_started_at = Some(Instant::now());
        record.urgent = urgent;
        let (tx, rx) = oneshot::channel();
        record.activation_listeners.push(tx);
        drop(channels);
        let _ = self.wake.try_send(());
        Ok(rx)
    }

    /// Drop a channel back to `Opened`, resolving once reconciled.
    pub fn deactivate(&self, index: usize) -> Result<oneshot::Receiver<()>, AmplifierError> {
        let mut channels = self.shared.channels.lock().expect("channels poisoned");
        let record = channels
            .get_mut(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))?;
        if record.state != ChannelState::Active {
            return Err(AmplifierError::InvalidTransition(record.state));
        }
        record.state = ChannelState::PendingDeactivation;
        let (tx, rx) = oneshot::channel();
        record.deactivation_listeners.push(tx);
        drop(channels);
        let _ = self.wake.try_send(());
        Ok(rx)
    }

    /// Drop a channel to `Closed`, waiting for the relay to actually
    /// de-energize if other channels are still keeping it powered.
    pub fn terminate(&self, index: usize) -> Result<oneshot::Receiver<()>, AmplifierError> {
        let mut channels = self.shared.channels.lock().expect("channels poisoned");
        let record = channels
            .get_mut(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))?;
        match record.state {
            ChannelState::Closed => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(());
                Ok(rx)
            }
            ChannelState::Opened => {
                record.state = ChannelState::Closed;
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(());
                Ok(rx)
            }
            ChannelState::PendingActivation | ChannelState::Active => {
                record.resolve_activation(ActivationOutcome::Cancelled);
                record.state = ChannelState::PendingTermination;
                let (tx, rx) = oneshot::channel();
                record.deactivation_listeners.push(tx);
                drop(channels);
                let _ = self.wake.try_send(());
                Ok(rx)
            }
            other => Err(AmplifierError::InvalidTransition(other)),
        }
    }

    pub fn enqueue(&self, index: usize, track: &Track) -> Result<oneshot::Receiver<()>, AmplifierError> {
        let mixer = self.shared.mixer.lock().expect("mixer poisoned");
        match mixer.enqueue(index, track) {
            Some(Ok(rx)) => Ok(rx),
            Some(Err(e)) => Err(AmplifierError::Player(e)),
            None => Err(AmplifierError::ChannelIndexOutOfRange(index)),
        }
    }

    pub fn clear(&self, index: usize) -> Result<(), AmplifierError> {
        let mixer = self.shared.mixer.lock().expect("mixer poisoned");
        mixer.clear(index).ok_or(AmplifierError::ChannelIndexOutOfRange(index))
    }

    pub fn skip(&self, index: usize) -> Result<(), AmplifierError> {
        let mixer = self.shared.mixer.lock().expect("mixer poisoned");
        mixer.skip(index).ok_or(AmplifierError::ChannelIndexOutOfRange(index))
    }

    pub fn duration_left(&self, index: usize) -> Result<u64, AmplifierError> {
        let mixer = self.shared.mixer.lock().expect("mixer poisoned");
        mixer
            .duration_left_ms(index)
            .ok_or(AmplifierError::ChannelIndexOutOfRange(index))
    }

    /// Max remaining queue duration across every channel — every enabled
    /// player drains concurrently in real time, so the bottleneck is
    /// whichever one has the most left, not the sum of all of them.
    pub fn aggregate_duration_left(&self) -> u64 {
        self.shared.mixer.lock().expect("mixer poisoned").aggregate_duration_left_ms()
    }

    fn warm(record: &ChannelRecord, warming: Duration, cooling: Duration, last_end: Option<Instant>) -> bool {
        if record.urgent {
            return true;
        }
        let elapsed = record
            .activation_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        if elapsed >= warming {
            return true;
        }
        if let Some(end) = last_end {
            if end.elapsed() <= cooling {
                return true;
            }
        }
        false
    }

    fn reconcile_loop(shared: Arc<Shared>, wake: Receiver<()>, shutdown: Arc<AtomicBool>, tick: Duration) {
        info!("amplifier reconciliation thread started");
        while !shutdown.load(Ordering::SeqCst) {
            match wake.recv_timeout(tick) {
                Ok(()) => Self::reconcile(&shared),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => Self::reconcile(&shared),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("amplifier reconciliation thread stopped");
    }

    fn reconcile(shared: &Arc<Shared>) {
        let mut channels = shared.channels.lock().expect("channels poisoned");
        let mut mixer = shared.mixer.lock().expect("mixer poisoned");
        let last_end = *shared.last_powered_interval_end.lock().expect("last_end poisoned");

        for (i, record) in channels.iter_mut().enumerate() {
            if record.state == ChannelState::PendingActivation
                && Self::warm(record, shared.warming, shared.cooling, last_end)
            {
                record.state = ChannelState::Active;
                record.resolve_activation(ActivationOutcome::Success);
                debug!(channel = i, "activated");
            }
        }

        for (i, record) in channels.iter_mut().enumerate() {
            if record.state == ChannelState::PendingDeactivation {
                record.state = ChannelState::Opened;
                record.resolve_deactivation();
                debug!(channel = i, "deactivated");
            }
        }

        Self::sync_mixer(&channels, &mut mixer);

        let powered_desired = channels.iter().any(|c| {
            matches!(
                c.state,
                ChannelState::PendingActivation | ChannelState::Active | ChannelState::PendingTermination
            )
        });

        let is_powered = shared.relay.closed();
        if powered_desired && !is_powered {
            shared.relay.close();
        } else if !powered_desired && is_powered {
            shared.relay.open_relay();
            *shared.last_powered_interval_end.lock().expect("last_end poisoned") = Some(Instant::now());
        }

        if !powered_desired {
            for (i, record) in channels.iter_mut().enumerate() {
                if record.state == ChannelState::PendingTermination {
                    record.state = ChannelState::Closed;
                    record.resolve_deactivation();
                    debug!(channel = i, "terminated");
                }
            }
            Self::sync_mixer(&channels, &mut mixer);
        }
    }

    /// Keep every mixer slot's enabled/cleared state in step with its
    /// channel's state. Any `Pending*` channel keeps its slot enabled but
    /// cleared, so a higher-priority channel that is merely warming up
    /// (queue still empty) already wins the selection sweep and silences
    /// whatever lower channel is currently audible, instead of staying
    /// quiet until the warm-up finishes.
    fn sync_mixer(channels: &[ChannelRecord], mixer: &mut PriorityMixer) {
        for (i, record) in channels.iter().enumerate() {
            match record.state {
                ChannelState::Closed | ChannelState::Opened => mixer.disable(i),
                ChannelState::Active => mixer.enable(i),
                ChannelState::PendingActivation
                | ChannelState::PendingDeactivation
                | ChannelState::PendingTermination => {
                    mixer.clear(i);
                    mixer.enable(i);
                }
            }
        }
    }
}

impl Drop for AmplifierController {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.wake.clone());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("amplifier reconciliation thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warm_urgent_bypasses_timers() {
        let record = ChannelRecord {
            state: ChannelState::PendingActivation,
            activation_started_at: Some(Instant::now()),
            urgent: true,
            activation_listeners: Vec::new(),
            deactivation_listeners: Vec::new(),
        };
        assert!(AmplifierController::warm(
            &record,
            Duration::from_secs(30),
            Duration::from_secs(5),
            None
        ));
    }

    #[test]
    fn test_warm_recently_cooled_amplifier_is_already_warm() {
        let record = ChannelRecord {
            state: ChannelState::PendingActivation,
            activation_started_at: Some(Instant::now()),
            urgent: false,
            activation_listeners: Vec::new(),
            deactivation_listeners: Vec::new(),
        };
        let last_end = Some(Instant::now());
        assert!(AmplifierController::warm(
            &record,
            Duration::from_secs(30),
            Duration::from_secs(5),
            last_end
        ));
    }

    #[test]
    fn test_warm_cold_amplifier_must_wait() {
        let record = ChannelRecord {
            state: ChannelState::PendingActivation,
            activation_started_at: Some(Instant::now()),
            urgent: false,
            activation_listeners: Vec::new(),
            deactivation_listeners: Vec::new(),
        };
        assert!(!AmplifierController::warm(
            &record,
            Duration::from_secs(30),
            Duration::from_secs(5),
            None
        ));
    }

    #[test]
    #[ignore = "requires audio and relay hardware"]
    fn test_full_lifecycle() {
        // Exercised against real hardware only; see pa_relay/pa_core
        // integration notes in DESIGN.md.
    }
}
