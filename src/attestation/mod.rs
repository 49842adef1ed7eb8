mod error;
mod prepare;
mod retrieve;
mod submit;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::AttestationError;
pub use prepare::{BodyLayout, RequestPreparer};
pub use retrieve::{PollOutcome, PollPolicy, ProofResult, ProofRetriever};
pub use submit::RequestSubmitter;

pub const EVM_TRANSACTION: &str = "EVMTransaction";
pub const LIQUIDITY_EVENT: &str = "LiquidityEvent";

/// A query to be attested. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationRequest {
    attestation_type: String,
    source_id: String,
    parameters: Map<String, Value>,
}

impl AttestationRequest {
    pub fn new(
        attestation_type: impl Into<String>,
        source_id: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            attestation_type: attestation_type.into(),
            source_id: source_id.into(),
            parameters,
        }
    }

    /// Request for one of the transaction-shaped attestation types
    /// (`EVMTransaction`, `LiquidityEvent`).
    pub fn transaction(
        attestation_type: impl Into<String>,
        source_id: impl Into<String>,
        params: TransactionParams,
    ) -> Result<Self, AttestationError> {
        params.validate()?;
        let parameters = match serde_json::to_value(&params) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(AttestationError::InvalidRequest(format!(
                    "parameters did not serialize to an object: {other}"
                )))
            }
            Err(e) => return Err(AttestationError::InvalidRequest(e.to_string())),
        };
        Ok(Self::new(attestation_type, source_id, parameters))
    }

    pub fn attestation_type(&self) -> &str {
        &self.attestation_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    pub transaction_hash: String,
    #[serde(serialize_with = "serialize_as_string")]
    pub required_confirmations: u32,
    pub provide_input: bool,
    pub list_events: bool,
    pub log_indices: Vec<u32>,
}

impl TransactionParams {
    pub fn new(transaction_hash: impl Into<String>) -> Self {
        Self {
            transaction_hash: transaction_hash.into(),
            required_confirmations: 1,
            provide_input: true,
            list_events: true,
            log_indices: vec![],
        }
    }

    fn validate(&self) -> Result<(), AttestationError> {
        let digits = self
            .transaction_hash
            .strip_prefix("0x")
            .unwrap_or_default();
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AttestationError::InvalidRequest(format!(
                "{:?} is not a 0x-prefixed 32 byte transaction hash",
                self.transaction_hash
            )));
        }
        Ok(())
    }
}

fn serialize_as_string<S: serde::Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Server-generated canonical form of a request. Forwarded, never inspected.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedRequest(String);

impl EncodedRequest {
    pub fn new(token: impl Into<String>) -> Result<Self, AttestationError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AttestationError::InvalidState(
                "encoded request is empty".to_owned(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncodedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedRequest({})", short(&self.0))
    }
}

impl fmt::Display for EncodedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finalization epoch. Only non-negative values can be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RoundId(u64);

impl RoundId {
    /// Raw value used on the wire by the scripts to signal a failed submission.
    pub const SENTINEL: i64 = -1;

    pub fn new(round: u64) -> Self {
        Self(round)
    }

    pub fn from_raw(raw: i64) -> Result<Self, AttestationError> {
        u64::try_from(raw).map(Self).map_err(|_| {
            AttestationError::InvalidState(format!(
                "round id {raw} is not a valid round (sentinel is {})",
                Self::SENTINEL
            ))
        })
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An encoded request paired with the round it was submitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    encoded: EncodedRequest,
    round: RoundId,
}

impl Submission {
    pub(crate) fn new(encoded: EncodedRequest, round: RoundId) -> Self {
        Self { encoded, round }
    }

    /// Rebuilds a submission from values recorded by an earlier run.
    pub fn resume(encoded: &str, raw_round: i64) -> Result<Self, AttestationError> {
        let round = RoundId::from_raw(raw_round)?;
        Ok(Self::new(EncodedRequest::new(encoded)?, round))
    }

    pub fn encoded(&self) -> &EncodedRequest {
        &self.encoded
    }

    pub fn round(&self) -> RoundId {
        self.round
    }
}

pub(crate) fn short(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 18 {
        return s.to_owned();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}..{tail}")
}
