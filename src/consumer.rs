use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_dyn_abi::{DynSolType, DynSolValue};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;

use crate::attestation::{AttestationError, ProofResult};

const LOG_TARGET: &str = "consumer";

/// Arguments of the on-chain verification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCall {
    pub merkle_proof: Vec<String>,
    pub data: Value,
}

/// Where a finished verification call goes: a contract client, a file, stdout.
pub trait ProofSink: Send + Sync {
    fn deliver(&self, call: &VerificationCall) -> anyhow::Result<()>;
}

pub struct StdoutSink;

impl ProofSink for StdoutSink {
    fn deliver(&self, call: &VerificationCall) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(call)?);
        Ok(())
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }
}

impl ProofSink for FileSink {
    fn deliver(&self, call: &VerificationCall) -> anyhow::Result<()> {
        fs::write(&self.path, serde_json::to_vec_pretty(call)?)
            .with_context(|| format!("could not write {}", self.path.display()))?;
        log::info!(target: LOG_TARGET, "verification call written to {}", self.path.display());
        Ok(())
    }
}

/// Turns a retrieved proof into a [`VerificationCall`] and hands it to a sink.
#[derive(Debug, Clone, Default)]
pub struct ProofConsumer {
    schema: Option<String>,
}

impl ProofConsumer {
    /// Without a schema the call carries `response_hex` untouched.
    pub fn new(schema: Option<String>) -> Self {
        Self { schema }
    }

    pub fn build_call(&self, proof: &ProofResult) -> Result<VerificationCall, AttestationError> {
        let data = match &self.schema {
            Some(schema) => decode_response(&proof.response_hex, schema)?,
            None => Value::String(proof.response_hex.clone()),
        };
        Ok(VerificationCall {
            merkle_proof: proof.merkle_proof.clone(),
            data,
        })
    }

    pub fn consume(
        &self,
        proof: &ProofResult,
        sink: &dyn ProofSink,
    ) -> Result<VerificationCall, AttestationError> {
        let call = self.build_call(proof)?;
        log::debug!(target: LOG_TARGET, "decoded response: {}", call.data);
        sink.deliver(&call).map_err(AttestationError::Sink)?;
        Ok(call)
    }
}

/// Decodes `response_hex` as a single ABI value of type `schema`, e.g.
/// `tuple(address,uint256,uint256)`.
pub fn decode_response(response_hex: &str, schema: &str) -> Result<Value, AttestationError> {
    let schema = schema.trim();
    let normalized = schema
        .strip_prefix("tuple")
        .filter(|rest| rest.starts_with('('))
        .unwrap_or(schema);
    let ty = DynSolType::parse(normalized)
        .map_err(|e| AttestationError::Decode(format!("invalid schema {schema:?}: {e}")))?;

    let digits = response_hex.strip_prefix("0x").unwrap_or(response_hex);
    let bytes = hex::decode(digits)
        .map_err(|e| AttestationError::Decode(format!("response is not hex: {e}")))?;
    let value = ty
        .abi_decode(&bytes)
        .map_err(|e| AttestationError::Decode(format!("{schema}: {e}")))?;
    Ok(to_json(&value))
}

fn to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word.as_slice()[..*size])))
        }
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}
