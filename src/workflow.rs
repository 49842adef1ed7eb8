use std::time::Duration;

use colored::Colorize;
use enum_display::EnumDisplay;
use thiserror::Error;
use tokio::time::Instant;

use crate::{
    attestation::{
        AttestationError, AttestationRequest, EncodedRequest, ProofResult, ProofRetriever,
        RequestPreparer, RequestSubmitter, Submission,
    },
    config::ClientConfig,
    consumer::{ProofConsumer, ProofSink, VerificationCall},
    transport::HttpTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumDisplay)]
pub enum Phase {
    Preparing,
    Submitting,
    Retrieving,
    Consuming,
    Done,
}

#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub phase: Phase,
    pub elapsed: Duration,
    pub detail: String,
}

/// What happened in each phase of one run, in order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    fn record(&mut self, phase: Phase, started: Instant, detail: impl Into<String>) {
        self.events.push(TraceEvent {
            phase,
            elapsed: started.elapsed(),
            detail: detail.into(),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.events.iter().map(|e| e.phase).collect()
    }
}

#[derive(Debug)]
pub struct Completed {
    pub submission: Submission,
    pub proof: ProofResult,
    pub call: VerificationCall,
    pub trace: Trace,
}

#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct WorkflowError {
    pub phase: Phase,
    #[source]
    pub source: AttestationError,
    pub trace: Trace,
}

enum Step {
    Prepare(AttestationRequest),
    Submit {
        attestation_type: String,
        encoded: EncodedRequest,
    },
    Retrieve(Submission),
    Consume(Submission, ProofResult),
}

impl Step {
    fn phase(&self) -> Phase {
        match self {
            Step::Prepare(_) => Phase::Preparing,
            Step::Submit { .. } => Phase::Submitting,
            Step::Retrieve(_) => Phase::Retrieving,
            Step::Consume(..) => Phase::Consuming,
        }
    }
}

enum Transition {
    Next { step: Step, detail: String },
    Terminal(Submission, ProofResult, VerificationCall),
}

/// Drives prepare → submit → retrieve → consume for one request at a time.
///
/// Runs share nothing but the HTTP clients, so one client can drive several
/// requests concurrently.
#[derive(Debug, Clone)]
pub struct AttestationClient {
    verifier: HttpTransport,
    chain: String,
    preparer: RequestPreparer,
    retriever: ProofRetriever,
    consumer: ProofConsumer,
}

impl AttestationClient {
    pub fn new(config: &ClientConfig) -> Result<Self, AttestationError> {
        let verifier = HttpTransport::new(config.verifier.clone(), &config.transport)?;
        let da_layer = HttpTransport::new(config.da_layer.clone(), &config.transport)?;
        Ok(Self {
            preparer: RequestPreparer::new(verifier.clone(), &config.chain, config.body_layout),
            verifier,
            chain: config.chain.clone(),
            retriever: ProofRetriever::new(da_layer, config.poll.clone()),
            consumer: ProofConsumer::new(config.decode_schema.clone()),
        })
    }

    pub async fn run(
        &self,
        request: &AttestationRequest,
        sink: &dyn ProofSink,
    ) -> Result<Completed, WorkflowError> {
        let label = request
            .parameters()
            .get("transactionHash")
            .and_then(|v| v.as_str())
            .unwrap_or(request.attestation_type())
            .to_owned();
        self.drive(Step::Prepare(request.clone()), &label, sink)
            .await
    }

    /// Skips prepare and submit for a request submitted by an earlier run.
    pub async fn resume(
        &self,
        submission: Submission,
        sink: &dyn ProofSink,
    ) -> Result<Completed, WorkflowError> {
        let label = format!("round-{}", submission.round());
        self.drive(Step::Retrieve(submission), &label, sink).await
    }

    async fn drive(
        &self,
        mut step: Step,
        label: &str,
        sink: &dyn ProofSink,
    ) -> Result<Completed, WorkflowError> {
        let target = workflow_log_target(label);
        let run_started = Instant::now();
        let mut trace = Trace::default();
        loop {
            let phase = step.phase();
            log::info!(target: &target, "initializing state {}", phase.to_string().cyan());
            let started = Instant::now();

            match self.advance(step, sink).await {
                Ok(Transition::Next { step: next, detail }) => {
                    log::trace!(
                        target: &target,
                        "transitioning state: {} => {}", phase, next.phase()
                    );
                    trace.record(phase, started, detail);
                    step = next;
                }
                Ok(Transition::Terminal(submission, proof, call)) => {
                    trace.record(phase, started, "verification call delivered");
                    trace.record(Phase::Done, run_started, "completed");
                    log::info!(target: &target, "completed");
                    return Ok(Completed {
                        submission,
                        proof,
                        call,
                        trace,
                    });
                }
                Err(source) => {
                    log::error!(target: &target, "{} failed: {}", phase, source);
                    trace.record(phase, started, source.to_string());
                    return Err(WorkflowError {
                        phase,
                        source,
                        trace,
                    });
                }
            }
        }
    }

    async fn advance(&self, step: Step, sink: &dyn ProofSink) -> Result<Transition, AttestationError> {
        match step {
            Step::Prepare(request) => {
                let encoded = self.preparer.prepare(&request).await?;
                Ok(Transition::Next {
                    detail: format!("{encoded:?}"),
                    step: Step::Submit {
                        attestation_type: request.attestation_type().to_owned(),
                        encoded,
                    },
                })
            }
            Step::Submit {
                attestation_type,
                encoded,
            } => {
                let submitter =
                    RequestSubmitter::new(self.verifier.clone(), &self.chain, attestation_type);
                let submission = submitter.submit(encoded).await?;
                Ok(Transition::Next {
                    detail: format!("round {}", submission.round()),
                    step: Step::Retrieve(submission),
                })
            }
            Step::Retrieve(submission) => {
                let proof = self.retriever.retrieve(&submission).await?;
                Ok(Transition::Next {
                    detail: format!("proof with {} hashes", proof.merkle_proof.len()),
                    step: Step::Consume(submission, proof),
                })
            }
            Step::Consume(submission, proof) => {
                let call = self.consumer.consume(&proof, sink)?;
                Ok(Transition::Terminal(submission, proof, call))
            }
        }
    }
}

pub fn workflow_log_target(label: &str) -> String {
    format!(
        "workflow:{}",
        label.chars().take(10).collect::<String>().yellow()
    )
}
