use serde::Deserialize;
use serde_json::json;

use super::{prepare::verifier_path, AttestationError, EncodedRequest, RoundId, Submission};
use crate::transport::HttpTransport;

const LOG_TARGET: &str = "submit";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    round_id: Option<i64>,
}

/// Hands an encoded request to the verifier and learns which round it lands in.
///
/// Submissions are not retried: the server gives no idempotency guarantee.
#[derive(Debug, Clone)]
pub struct RequestSubmitter {
    transport: HttpTransport,
    chain: String,
    attestation_type: String,
}

impl RequestSubmitter {
    pub fn new(
        transport: HttpTransport,
        chain: impl Into<String>,
        attestation_type: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            chain: chain.into(),
            attestation_type: attestation_type.into(),
        }
    }

    pub async fn submit(&self, encoded: EncodedRequest) -> Result<Submission, AttestationError> {
        let path = verifier_path(&self.chain, &self.attestation_type, "submitRequest");
        log::info!(target: LOG_TARGET, "submitting {:?}", encoded);

        let response = self
            .transport
            .post_json(&path, &json!({ "abiEncodedRequest": encoded.as_str() }))
            .await?;
        if !response.is_success() {
            return Err(response.classify_failure());
        }

        let parsed: SubmitResponse = response.json().map_err(|e| {
            log::error!(target: LOG_TARGET, "verifier answered {} with a non-JSON body", response.status);
            AttestationError::MalformedResponse(format!("submitRequest body is not JSON: {e}"))
        })?;
        if let Some(failure) = response.embedded_failure() {
            return Err(failure);
        }
        let raw = parsed.round_id.ok_or_else(|| {
            AttestationError::MalformedResponse("submitRequest response has no roundId".to_owned())
        })?;
        let round = RoundId::from_raw(raw)?;

        log::info!(target: LOG_TARGET, "request accepted in round {}", round);
        Ok(Submission::new(encoded, round))
    }
}
