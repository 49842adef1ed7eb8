use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use url::Url;

use crate::{
    attestation::{
        AttestationError, AttestationRequest, BodyLayout, PollPolicy, Submission,
        TransactionParams,
    },
    config::ClientConfig,
    consumer::{FileSink, ProofSink, StdoutSink},
    transport::{AuthScheme, ServiceConfig, TransportConfig, DEFAULT_API_KEY_HEADER},
    workflow::{AttestationClient, Completed, WorkflowError},
};

/// Exit code for bad arguments or configuration.
const EXIT_USAGE: u8 = 1;
/// Exit code when interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthArg {
    ApiKey,
    Bearer,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    Envelope,
    Bare,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "request an attestation and fetch its proof", long_about = None)]
pub struct AttestArgs {
    /// transaction hash to attest; not needed with --resume-round
    #[arg(required_unless_present = "resume_round")]
    transaction_hash: Option<String>,

    #[arg(long = "verifier-url", env = "VERIFIER_URL")]
    verifier_url: Url,

    #[arg(long = "verifier-api-key", env = "VERIFIER_API_KEY", hide_env_values = true)]
    verifier_api_key: Option<String>,

    #[arg(long = "verifier-auth", value_enum, default_value = "api-key")]
    verifier_auth: AuthArg,

    /// header carrying the key when the auth scheme is api-key
    #[arg(long = "api-key-header", default_value = DEFAULT_API_KEY_HEADER)]
    api_key_header: String,

    #[arg(long = "da-layer-url", env = "DA_LAYER_URL")]
    da_layer_url: Url,

    #[arg(long = "da-layer-api-key", env = "DA_LAYER_API_KEY", hide_env_values = true)]
    da_layer_api_key: Option<String>,

    #[arg(long = "da-layer-auth", value_enum, default_value = "none")]
    da_layer_auth: AuthArg,

    #[arg(long, env = "ATTESTATION_CHAIN", default_value = "eth")]
    chain: String,

    #[arg(long = "attestation-type", default_value = "EVMTransaction")]
    attestation_type: String,

    #[arg(long = "source-id", default_value = "testETH")]
    source_id: String,

    #[arg(long = "body-layout", value_enum, default_value = "envelope")]
    body_layout: LayoutArg,

    #[arg(long = "required-confirmations", default_value = "1")]
    required_confirmations: u32,

    #[arg(long = "no-input")]
    no_input: bool,

    #[arg(long = "no-events")]
    no_events: bool,

    #[arg(long = "log-index")]
    log_indices: Vec<u32>,

    /// ABI type of the response, e.g. "tuple(address,uint256,uint256)"
    #[arg(long = "decode-schema")]
    decode_schema: Option<String>,

    /// write the verification call here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// seconds
    #[arg(long = "request-timeout", default_value = "30")]
    request_timeout: u64,

    /// seconds to wait before the first proof request
    #[arg(long = "initial-wait", default_value = "0")]
    initial_wait: u64,

    /// seconds
    #[arg(long = "poll-interval", default_value = "5")]
    poll_interval: u64,

    /// seconds
    #[arg(long = "max-poll-interval", default_value = "30")]
    max_poll_interval: u64,

    #[arg(long = "max-attempts", default_value = "20")]
    max_attempts: u32,

    /// seconds
    #[arg(long = "poll-deadline", default_value = "300")]
    poll_deadline: u64,

    /// round of an earlier submission; skips prepare and submit
    #[arg(long = "resume-round", requires = "encoded_request", allow_negative_numbers = true)]
    resume_round: Option<i64>,

    #[arg(long = "encoded-request", requires = "resume_round")]
    encoded_request: Option<String>,
}

impl AttestArgs {
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.poll_interval == 0 || self.max_poll_interval < self.poll_interval {
            bail!("poll interval must be positive and not above --max-poll-interval");
        }

        let verifier = ServiceConfig::new(self.verifier_url.clone()).with_auth(
            self.auth_scheme(self.verifier_auth),
            self.verifier_api_key.clone(),
        );
        let da_layer = ServiceConfig::new(self.da_layer_url.clone()).with_auth(
            self.auth_scheme(self.da_layer_auth),
            self.da_layer_api_key.clone(),
        );

        let mut config = ClientConfig::new(verifier, da_layer, &self.chain);
        config.body_layout = match self.body_layout {
            LayoutArg::Envelope => BodyLayout::Envelope,
            LayoutArg::Bare => BodyLayout::Bare,
        };
        config.transport = TransportConfig {
            timeout: Duration::from_secs(self.request_timeout),
            ..TransportConfig::default()
        };
        config.poll = PollPolicy {
            initial_wait: Duration::from_secs(self.initial_wait),
            initial_delay: Duration::from_secs(self.poll_interval),
            max_delay: Duration::from_secs(self.max_poll_interval),
            max_attempts: self.max_attempts,
            deadline: Duration::from_secs(self.poll_deadline),
            ..PollPolicy::default()
        };
        config.decode_schema = self.decode_schema.clone();
        Ok(config)
    }

    pub fn request(&self) -> Result<AttestationRequest, AttestationError> {
        let hash = self.transaction_hash.as_deref().ok_or_else(|| {
            AttestationError::InvalidRequest("no transaction hash given".to_owned())
        })?;
        let params = TransactionParams {
            required_confirmations: self.required_confirmations,
            provide_input: !self.no_input,
            list_events: !self.no_events,
            log_indices: self.log_indices.clone(),
            ..TransactionParams::new(hash)
        };
        AttestationRequest::transaction(&self.attestation_type, &self.source_id, params)
    }

    fn auth_scheme(&self, arg: AuthArg) -> AuthScheme {
        match arg {
            AuthArg::ApiKey => AuthScheme::ApiKeyHeader(self.api_key_header.clone()),
            AuthArg::Bearer => AuthScheme::Bearer,
            AuthArg::None => AuthScheme::None,
        }
    }

    fn sink(&self) -> Box<dyn ProofSink> {
        match &self.output {
            Some(path) => Box::new(FileSink::new(path)),
            None => Box::new(StdoutSink),
        }
    }
}

/// Runs the workflow described by `args` and returns the process exit code.
pub async fn run(args: AttestArgs) -> u8 {
    let sink = args.sink();
    tokio::select! {
        code = execute(&args, sink.as_ref()) => code,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} interrupted", "error:".red().bold());
            EXIT_INTERRUPTED
        }
    }
}

pub(crate) async fn execute(args: &AttestArgs, sink: &dyn ProofSink) -> u8 {
    let config = match args.client_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return EXIT_USAGE;
        }
    };
    let client = match AttestationClient::new(&config) {
        Ok(client) => client,
        Err(e) => return report_failure(&e),
    };

    let result = match (args.resume_round, args.encoded_request.as_deref()) {
        (Some(round), Some(encoded)) => match Submission::resume(encoded, round) {
            Ok(submission) => client.resume(submission, sink).await,
            Err(e) => return report_failure(&e),
        },
        _ => match args.request() {
            Ok(request) => client.run(&request, sink).await,
            Err(e) => return report_failure(&e),
        },
    };

    match result {
        Ok(completed) => {
            report_success(&completed);
            0
        }
        Err(WorkflowError { phase, source, trace }) => {
            for event in trace.events() {
                log::debug!("{} took {:?}: {}", event.phase, event.elapsed, event.detail);
            }
            eprintln!("{} while {}", "failed".red().bold(), phase.to_string().to_lowercase());
            report_failure(&source)
        }
    }
}

fn report_success(completed: &Completed) {
    eprintln!(
        "{} round {}, encoded request {}",
        "attested".green().bold(),
        completed.submission.round(),
        completed.submission.encoded()
    );
    for event in completed.trace.events() {
        log::debug!("{} took {:?}: {}", event.phase, event.elapsed, event.detail);
    }
}

fn report_failure(error: &AttestationError) -> u8 {
    eprintln!("{} {}", "error:".red().bold(), error.diagnosis());
    error.exit_code()
}
