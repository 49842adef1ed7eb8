use crate::{
    attestation::{BodyLayout, PollPolicy},
    transport::{ServiceConfig, TransportConfig},
};

/// Everything an [`AttestationClient`](crate::workflow::AttestationClient)
/// needs, passed in explicitly rather than read from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub verifier: ServiceConfig,
    pub da_layer: ServiceConfig,
    /// Chain tag used in verifier paths, e.g. `eth`.
    pub chain: String,
    pub body_layout: BodyLayout,
    pub transport: TransportConfig,
    pub poll: PollPolicy,
    /// ABI type used to decode `response_hex`; raw hex is forwarded when unset.
    pub decode_schema: Option<String>,
}

impl ClientConfig {
    pub fn new(verifier: ServiceConfig, da_layer: ServiceConfig, chain: impl Into<String>) -> Self {
        Self {
            verifier,
            da_layer,
            chain: chain.into(),
            body_layout: BodyLayout::default(),
            transport: TransportConfig::default(),
            poll: PollPolicy::default(),
            decode_schema: None,
        }
    }
}
