//! pa_core - Amplifier Controller, Priority Mixer, Speaker Session Layer
//!
//! This crate provides the core control logic for an HTTP-addressable tube
//! PA amplifier:
//! - Channel state machine with warm-up/cool-down gating (`amplifier`)
//! - "Highest enabled channel wins" priority audio mixing (`mixer`)
//! - Buffered, mixable audio playback per channel (`player`)
//! - Name-addressed channels with keep-alive expiry (`session`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      server (HTTP surface)                   │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                 │ method calls + oneshot awaits
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SpeakerSession (name→index, keep-alive reaper thread)         │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ AmplifierController (state machine, reconciliation thread)    │
//! │        │                                          │           │
//! │        ▼                                          ▼           │
//! │   PowerRelay (pa_relay)                    PriorityMixer       │
//! │                                                    │           │
//! │                                                    ▼           │
//! │                                              Player × N (cpal) │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod amplifier;
mod error;
mod mixer;
mod player;
mod session;
mod track;

pub use amplifier::{ActivationOutcome, AmplifierController, ChannelState};
pub use error::{AmplifierError, PlayerError, SessionError};
pub use mixer::PriorityMixer;
pub use player::{Player, PlayerConfig};
pub use session::{SpeakerSession, KEEPALIVE};
pub use track::{estimate_buffer_duration_ms, Track, TrackSpec};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = PlayerConfig::default();
        let _ = KEEPALIVE;
    }
}
