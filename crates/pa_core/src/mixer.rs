//! Priority mixer: "highest enabled & unmuted channel wins".
//!
//! Exactly one enabled, unmuted channel is ever audible at a time. Enabling,
//! disabling, muting or unmuting a channel re-runs the selection sweep from
//! the highest index down, unmuting the first `enabled[i] && !muted[i]`
//! channel it finds and muting every other channel — including channels
//! that are not currently enabled.
//!
//! `PriorityMixer` owns every per-channel operation (`enqueue`/`clear`/
//! `skip`/`pause`/`resume`/`mute`/`unmute`/`paused`/`muted`/`duration_left`)
//! behind a `Mixable` trait object rather than reaching through to a
//! concrete `Player`, so the selection sweep can be exercised in tests
//! without a real `cpal::Device`.

use std::sync::Arc;

use cpal::Device;
use tokio::sync::oneshot;

use crate::error::PlayerError;
use crate::player::{Player, PlayerConfig};
use crate::track::Track;

/// Anything the priority mixer can select between: a real `Player`, or a
/// test double.
pub trait Mixable: Send + Sync {
    fn enqueue(&self, track: &Track) -> Result<oneshot::Receiver<()>, PlayerError>;
    fn clear(&self);
    fn skip(&self);
    fn pause(&self);
    fn resume(&self);
    fn paused(&self) -> bool;
    fn mute(&self);
    fn unmute(&self);
    fn muted(&self) -> bool;
    fn duration_left_ms(&self) -> u64;
}

impl Mixable for Player {
    fn enqueue(&self, track: &Track) -> Result<oneshot::Receiver<()>, PlayerError> {
        Player::enqueue(self, track)
    }
    fn clear(&self) {
        Player::clear(self)
    }
    fn skip(&self) {
        Player::skip(self)
    }
    fn pause(&self) {
        Player::pause(self)
    }
    fn resume(&self) {
        Player::resume(self)
    }
    fn paused(&self) -> bool {
        Player::paused(self)
    }
    fn mute(&self) {
        Player::mute(self)
    }
    fn unmute(&self) {
        Player::unmute(self)
    }
    fn muted(&self) -> bool {
        Player::muted(self)
    }
    fn duration_left_ms(&self) -> u64 {
        Player::duration_left_ms(self)
    }
}

pub struct PriorityMixer {
    players: Vec<Arc<dyn Mixable>>,
    enabled: Vec<bool>,
    /// Per-channel user-intent mute, distinct from the selection-driven
    /// physical mute the sweep below applies to the underlying player.
    muted: Vec<bool>,
}

impl PriorityMixer {
    /// Build one player per channel, highest index = highest priority.
    pub fn new(device: &Device, channel_count: usize, config: PlayerConfig) -> Result<Self, PlayerError> {
        let mut players: Vec<Arc<dyn Mixable>> = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            players.push(Arc::new(Player::new(device, config)?));
        }
        Ok(Self {
            players,
            enabled: vec![false; channel_count],
            muted: vec![false; channel_count],
        })
    }

    pub fn channels(&self) -> usize {
        self.players.len()
    }

    /// Mark `index` eligible for audible playback and re-run selection.
    pub fn enable(&mut self, index: usize) {
        if let Some(flag) = self.enabled.get_mut(index) {
            *flag = true;
        }
        self.resume_all();
        self.select();
    }

    /// Mark `index` ineligible, clear and pause its player, and re-run selection.
    ///
    /// Resets the user-intent mute too, guaranteeing the next `enable`
    /// yields a pristine channel.
    pub fn disable(&mut self, index: usize) {
        if let Some(flag) = self.enabled.get_mut(index) {
            *flag = false;
        }
        if let Some(flag) = self.muted.get_mut(index) {
            *flag = false;
        }
        if let Some(player) = self.players.get(index) {
            player.clear();
            player.pause();
            player.unmute();
        }
        self.select();
    }

    pub fn count_enabled(&self) -> usize {
        self.enabled.iter().filter(|e| **e).count()
    }

    pub fn enqueue(&self, index: usize, track: &Track) -> Option<Result<oneshot::Receiver<()>, PlayerError>> {
        self.players.get(index).map(|p| p.enqueue(track))
    }

    pub fn clear(&self, index: usize) -> Option<()> {
        self.players.get(index).map(|p| p.clear())
    }

    pub fn skip(&self, index: usize) -> Option<()> {
        self.players.get(index).map(|p| p.skip())
    }

    pub fn pause(&self, index: usize) -> Option<()> {
        self.players.get(index).map(|p| p.pause())
    }

    pub fn resume(&self, index: usize) -> Option<()> {
        self.players.get(index).map(|p| p.resume())
    }

    pub fn paused(&self, index: usize) -> Option<bool> {
        self.players.get(index).map(|p| p.paused())
    }

    /// Set channel `index`'s user-intent mute and re-run selection.
    pub fn mute(&mut self, index: usize) -> Option<()> {
        let flag = self.muted.get_mut(index)?;
        *flag = true;
        self.select();
        Some(())
    }

    /// Clear channel `index`'s user-intent mute and re-run selection.
    pub fn unmute(&mut self, index: usize) -> Option<()> {
        let flag = self.muted.get_mut(index)?;
        *flag = false;
        self.select();
        Some(())
    }

    /// The user-intent mute for `index` (not the selection-driven physical mute).
    pub fn muted(&self, index: usize) -> Option<bool> {
        self.muted.get(index).copied()
    }

    pub fn duration_left_ms(&self, index: usize) -> Option<u64> {
        self.players.get(index).map(|p| p.duration_left_ms())
    }

    /// Aggregate remaining duration across every channel: every enabled
    /// player drains its queue concurrently in real time (muted or not),
    /// so the bottleneck is whichever one still has the most left, not the
    /// sum of all of them.
    pub fn aggregate_duration_left_ms(&self) -> u64 {
        self.players.iter().map(|p| p.duration_left_ms()).max().unwrap_or(0)
    }

    fn resume_all(&self) {
        for (i, enabled) in self.enabled.iter().enumerate() {
            if *enabled {
                if let Some(player) = self.players.get(i) {
                    player.resume();
                }
            }
        }
    }

    /// Walk channels high to low; unmute the first `enabled[i] && !muted[i]`
    /// one, mute the rest.
    fn select(&mut self) {
        let mut selected = false;
        for i in (0..self.players.len()).rev() {
            let player = &self.players[i];
            if !selected && self.enabled[i] && !self.muted[i] {
                player.unmute();
                selected = true;
            } else {
                player.mute();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A `Mixable` double that just records its physical mute state, so
    /// `select()`'s sweep can be asserted without a real `cpal::Device`.
    struct FakePlayer {
        muted: AtomicBool,
    }

    impl FakePlayer {
        fn new() -> Self {
            Self {
                muted: AtomicBool::new(false),
            }
        }
    }

    impl Mixable for FakePlayer {
        fn enqueue(&self, _track: &Track) -> Result<oneshot::Receiver<()>, PlayerError> {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            Ok(rx)
        }
        fn clear(&self) {}
        fn skip(&self) {}
        fn pause(&self) {}
        fn resume(&self) {}
        fn paused(&self) -> bool {
            false
        }
        fn mute(&self) {
            self.muted.store(true, Ordering::SeqCst);
        }
        fn unmute(&self) {
            self.muted.store(false, Ordering::SeqCst);
        }
        fn muted(&self) -> bool {
            self.muted.load(Ordering::SeqCst)
        }
        fn duration_left_ms(&self) -> u64 {
            0
        }
    }

    fn fake_mixer(channels: usize) -> PriorityMixer {
        PriorityMixer {
            players: (0..channels)
                .map(|_| Arc::new(FakePlayer::new()) as Arc<dyn Mixable>)
                .collect(),
            enabled: vec![false; channels],
            muted: vec![false; channels],
        }
    }

    fn physical_mutes(mixer: &PriorityMixer) -> Vec<bool> {
        mixer.players.iter().map(|p| p.muted()).collect()
    }

    #[test]
    fn test_count_enabled() {
        let mut mixer = fake_mixer(3);
        mixer.enabled[0] = true;
        mixer.enabled[2] = true;
        assert_eq!(mixer.count_enabled(), 2);
    }

    #[test]
    fn test_channels() {
        let mixer = fake_mixer(4);
        assert_eq!(mixer.channels(), 4);
    }

    #[test]
    fn test_select_no_channel_enabled_mutes_everything() {
        let mut mixer = fake_mixer(3);
        mixer.select();
        assert_eq!(physical_mutes(&mixer), vec![true, true, true]);
    }

    #[test]
    fn test_select_highest_enabled_channel_wins() {
        let mut mixer = fake_mixer(3);
        mixer.enable(0);
        mixer.enable(1);
        mixer.enable(2);
        // Highest index wins; every other enabled channel is silenced too.
        assert_eq!(physical_mutes(&mixer), vec![true, true, false]);
    }

    #[test]
    fn test_select_skips_gaps_to_next_highest_enabled() {
        let mut mixer = fake_mixer(4);
        mixer.enable(0);
        mixer.enable(2);
        // Channel 3 is never enabled; channel 2 is the highest enabled one.
        assert_eq!(physical_mutes(&mixer), vec![true, true, false, true]);
    }

    #[test]
    fn test_select_respects_user_mute_over_priority() {
        let mut mixer = fake_mixer(3);
        mixer.enable(0);
        mixer.enable(2);
        mixer.mute(2);
        // Channel 2 outranks channel 0 but is user-muted, so 0 wins instead.
        assert_eq!(physical_mutes(&mixer), vec![false, true, true]);
        assert_eq!(mixer.muted(2), Some(true));
    }

    #[test]
    fn test_unmute_restores_priority_winner() {
        let mut mixer = fake_mixer(3);
        mixer.enable(0);
        mixer.enable(2);
        mixer.mute(2);
        mixer.unmute(2);
        assert_eq!(physical_mutes(&mixer), vec![true, true, false]);
    }

    #[test]
    fn test_disable_resets_user_mute_and_drops_out_of_selection() {
        let mut mixer = fake_mixer(2);
        mixer.enable(0);
        mixer.enable(1);
        mixer.mute(1);
        // Channel 1 was winning priority-wise but is user-muted, so 0 wins.
        assert_eq!(physical_mutes(&mixer), vec![false, true]);
        mixer.disable(1);
        assert_eq!(mixer.muted(1), Some(false));
        assert_eq!(mixer.count_enabled(), 1);
        // 0 is still the only enabled channel and now wins outright.
        assert_eq!(physical_mutes(&mixer), vec![false, true]);
    }

    #[test]
    fn test_aggregate_duration_left_is_max_not_sum() {
        struct FixedDuration(u64);
        impl Mixable for FixedDuration {
            fn enqueue(&self, _: &Track) -> Result<oneshot::Receiver<()>, PlayerError> {
                unimplemented!()
            }
            fn clear(&self) {}
            fn skip(&self) {}
            fn pause(&self) {}
            fn resume(&self) {}
            fn paused(&self) -> bool {
                false
            }
            fn mute(&self) {}
            fn unmute(&self) {}
            fn muted(&self) -> bool {
                false
            }
            fn duration_left_ms(&self) -> u64 {
                self.0
            }
        }

        let mixer = PriorityMixer {
            players: vec![
                Arc::new(FixedDuration(100)),
                Arc::new(FixedDuration(4000)),
                Arc::new(FixedDuration(250)),
            ],
            enabled: vec![true; 3],
            muted: vec![false; 3],
        };
        assert_eq!(mixer.aggregate_duration_left_ms(), 4000);
    }
}
