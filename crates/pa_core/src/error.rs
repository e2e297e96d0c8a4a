//! Core Error Types

use thiserror::Error;

use crate::amplifier::ChannelState;

/// Errors from an individual player's queue.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("track could not be resampled or decoded: {0}")]
    BadTrack(String),
}

/// Errors from the amplifier controller's channel state machine.
#[derive(Error, Debug)]
pub enum AmplifierError {
    #[error("channel index {0} out of range")]
    ChannelIndexOutOfRange(usize),

    #[error("invalid transition from state {0:?}")]
    InvalidTransition(ChannelState),

    #[error("player error: {0}")]
    Player(#[from] PlayerError),
}

/// Errors surfaced by the speaker session layer, and by extension the HTTP API.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no channel named {0}")]
    ChannelNotFound(String),

    #[error("channel is opened but not activated")]
    ChannelOpened,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("channel is not active")]
    ChannelInactive,

    #[error("track is incompatible with this channel")]
    IncompatibleTrack,

    #[error(transparent)]
    Amplifier(#[from] AmplifierError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AmplifierError::ChannelIndexOutOfRange(3);
        assert!(err.to_string().contains('3'));

        let err = SessionError::ChannelNotFound("stage-left".into());
        assert!(err.to_string().contains("stage-left"));
    }

    #[test]
    fn test_session_error_from_amplifier() {
        let amp_err = AmplifierError::ChannelIndexOutOfRange(1);
        let session_err: SessionError = amp_err.into();
        assert!(matches!(session_err, SessionError::Amplifier(_)));
    }
}
