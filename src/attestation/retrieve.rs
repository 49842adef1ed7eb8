use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Instant};

use super::{AttestationError, RoundId, Submission};
use crate::transport::{HttpTransport, RawResponse};

const LOG_TARGET: &str = "retrieve";

pub const PROOF_BY_REQUEST_ROUND_PATH: &str = "api/v1/fdc/proof-by-request-round-raw";

/// Statuses the DA layer uses while a round is still being finalized.
const NOT_READY_STATUSES: [u16; 3] = [404, 425, 503];

/// Stand-in for deadlines too far out to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Bounded exponential backoff for proof polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep before the very first poll.
    pub initial_wait: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
    /// Overall budget, measured from the start of polling.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::ZERO,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: 20,
            deadline: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    /// Sleep that follows the `attempt`-th not-ready answer (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Merkle proof and attested payload for one request, exactly as served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    pub merkle_proof: Vec<String>,
    pub response_hex: String,
    pub round_id: RoundId,
    pub raw_status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(ProofResult),
    NotReady,
}

/// Polls the DA layer for the proof of a submitted request.
#[derive(Debug, Clone)]
pub struct ProofRetriever {
    transport: HttpTransport,
    policy: PollPolicy,
}

impl ProofRetriever {
    pub fn new(transport: HttpTransport, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// A single request, without retrying.
    pub async fn fetch_once(&self, submission: &Submission) -> Result<PollOutcome, AttestationError> {
        match self.poll(submission).await {
            Ok(proof) => Ok(PollOutcome::Ready(proof)),
            Err(AttestationError::NotReady { .. }) => Ok(PollOutcome::NotReady),
            Err(e) => Err(e),
        }
    }

    async fn poll(&self, submission: &Submission) -> Result<ProofResult, AttestationError> {
        let body = json!({
            "abiEncodedRequest": submission.encoded().as_str(),
            "roundId": submission.round().value(),
        });
        let response = self
            .transport
            .post_json(PROOF_BY_REQUEST_ROUND_PATH, &body)
            .await?;
        classify(&response, submission.round())
    }

    pub async fn retrieve(&self, submission: &Submission) -> Result<ProofResult, AttestationError> {
        let deadline = instant_after(Instant::now(), self.policy.deadline);
        self.retrieve_until(submission, deadline).await
    }

    /// Polls until a proof is served, a hard error occurs, `max_attempts`
    /// not-ready answers were seen, or `deadline` would be crossed.
    pub async fn retrieve_until(
        &self,
        submission: &Submission,
        deadline: Instant,
    ) -> Result<ProofResult, AttestationError> {
        let started = Instant::now();
        let round = submission.round();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;
        let timed_out = |attempts: u32| AttestationError::Timeout {
            round_id: round.value(),
            attempts,
            elapsed: started.elapsed(),
        };

        if !self.policy.initial_wait.is_zero() {
            if instant_after(started, self.policy.initial_wait) >= deadline {
                return Err(timed_out(attempts));
            }
            log::info!(
                target: LOG_TARGET,
                "waiting {:?} for round {} to finalize",
                self.policy.initial_wait,
                round
            );
            sleep(self.policy.initial_wait).await;
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(attempts));
            }

            attempts += 1;
            match timeout(remaining, self.poll(submission)).await {
                Err(_elapsed) => return Err(timed_out(attempts)),
                Ok(Err(e)) if e.is_retryable() => {
                    log::debug!(target: LOG_TARGET, "{}", e);
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(proof)) => {
                    log::info!(
                        target: LOG_TARGET,
                        "proof for round {} retrieved after {} attempt(s)",
                        round,
                        attempts
                    );
                    return Ok(proof);
                }
            }

            if attempts >= max_attempts {
                return Err(timed_out(attempts));
            }
            let delay = self.policy.delay_after(attempts);
            if instant_after(Instant::now(), delay) >= deadline {
                return Err(timed_out(attempts));
            }
            log::info!(
                target: LOG_TARGET,
                "round {} not finalized yet (attempt {}/{}), retrying in {:?}",
                round,
                attempts,
                max_attempts,
                delay
            );
            sleep(delay).await;
        }
    }
}

/// `start + wait`, clamped to [`FAR_FUTURE`] instead of overflowing.
fn instant_after(start: Instant, wait: Duration) -> Instant {
    start
        .checked_add(wait)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

fn classify(response: &RawResponse, round: RoundId) -> Result<ProofResult, AttestationError> {
    let not_ready = Err(AttestationError::NotReady {
        round_id: round.value(),
    });
    let status = response.status.as_u16();
    if !response.is_success() {
        if NOT_READY_STATUSES.contains(&status) {
            log::debug!(target: LOG_TARGET, "DA layer answered {}: {}", status, response.failure_message());
            return not_ready;
        }
        return Err(response.classify_failure());
    }
    if response.body.trim().is_empty() {
        return not_ready;
    }

    let value: Value = response.json().map_err(|e| {
        log::error!(target: LOG_TARGET, "DA layer answered {} with a non-JSON body", status);
        AttestationError::MalformedResponse(format!("proof body is not JSON: {e}"))
    })?;
    let map = match value {
        Value::Null => return not_ready,
        Value::Object(map) => map,
        other => {
            return Err(AttestationError::MalformedResponse(format!(
                "expected a JSON object, got {other}"
            )))
        }
    };

    let response_hex = match map.get("response_hex") {
        None | Some(Value::Null) => return not_ready,
        Some(Value::String(hex)) => hex.clone(),
        Some(other) => {
            return Err(AttestationError::MalformedResponse(format!(
                "response_hex is not a string: {other}"
            )))
        }
    };
    decode_hex(&response_hex)?;

    let merkle_proof = match map.get("proof") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(hash) => Ok(hash.clone()),
                other => Err(AttestationError::MalformedResponse(format!(
                    "proof entry is not a string: {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(AttestationError::MalformedResponse(
                "proof is missing or not an array".to_owned(),
            ))
        }
    };

    Ok(ProofResult {
        merkle_proof,
        response_hex,
        round_id: round,
        raw_status: status,
    })
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>, AttestationError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits)
        .map_err(|e| AttestationError::MalformedResponse(format!("{value:?} is not hex: {e}")))
}
