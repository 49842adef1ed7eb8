use std::time::Duration;

use thiserror::Error;

/// Every way a phase of the attestation workflow can fail.
///
/// Callers branch on the variant; none of these are panics.
#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("unauthorized (status {status:?}): {message}")]
    Auth {
        status: Option<u16>,
        message: String,
    },
    #[error("transport failure (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("proof for round {round_id} is not available yet")]
    NotReady { round_id: u64 },
    #[error("proof for round {round_id} not available after {attempts} attempts ({elapsed:?})")]
    Timeout {
        round_id: u64,
        attempts: u32,
        elapsed: Duration,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request rejected by verifier: {0}")]
    Rejected(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("proof sink failed")]
    Sink(#[source] anyhow::Error),
}

impl AttestationError {
    pub fn transport<M: ToString>(status: Option<u16>, message: M) -> Self {
        AttestationError::Transport {
            status,
            message: message.to_string(),
        }
    }

    /// Whether polling may continue after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttestationError::NotReady { .. })
    }

    /// Process exit code used by the CLI for this kind of failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            AttestationError::Auth { .. } => 2,
            AttestationError::Transport { .. } => 3,
            AttestationError::MalformedResponse(_) => 4,
            AttestationError::NotReady { .. } | AttestationError::Timeout { .. } => 5,
            AttestationError::InvalidState(_) => 6,
            AttestationError::InvalidRequest(_) => 7,
            AttestationError::Rejected(_) => 8,
            AttestationError::Decode(_) => 9,
            AttestationError::Sink(_) => 10,
        }
    }

    /// Human readable explanation printed by the CLI.
    pub fn diagnosis(&self) -> String {
        match self {
            AttestationError::Auth { .. } => format!(
                "{self}. Check the API key and the configured auth scheme for this service."
            ),
            AttestationError::Transport { .. } => {
                format!("{self}. The service could not be reached or refused the request.")
            }
            AttestationError::MalformedResponse(_) => {
                format!("{self}. The service answered with an unexpected body.")
            }
            AttestationError::NotReady { .. } | AttestationError::Timeout { .. } => format!(
                "{self}. The round may still be finalizing; retry later with --resume-round."
            ),
            AttestationError::InvalidState(_) => {
                format!("{self}. No proof request was sent.")
            }
            AttestationError::InvalidRequest(_) => format!("{self}. Fix the input and retry."),
            AttestationError::Rejected(_) => {
                format!("{self}. The verifier could not attest this query.")
            }
            AttestationError::Decode(_) => {
                format!("{self}. Check the --decode-schema against the attestation type.")
            }
            AttestationError::Sink(e) => format!("{self}: {e:#}"),
        }
    }
}
