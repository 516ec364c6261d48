use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Hub rejected request (code {code}): {message}")]
    Hub { code: i64, message: String },

    #[error("Signaling channel disconnected: {0}")]
    SignalingDisconnected(String),

    #[error("Hub denied renegotiation")]
    NegotiationDenied,

    #[error("Peer is not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail fast on empty identifiers; every public operation that takes
/// an id goes through here before doing any I/O.
pub(crate) fn require_non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("room-1", "room id").is_ok());
        assert!(matches!(
            require_non_empty("", "room id"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            require_non_empty("   ", "client id"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_argument_message_names_field() {
        let err = require_non_empty("", "client id").unwrap_err();
        assert!(err.to_string().contains("client id"));
    }
}
