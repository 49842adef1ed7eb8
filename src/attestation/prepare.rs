use serde::Deserialize;
use serde_json::{json, Value};

use super::{AttestationError, AttestationRequest, EncodedRequest};
use crate::transport::HttpTransport;

const LOG_TARGET: &str = "prepare";
const VALID_STATUS: &str = "VALID";

/// Shape of the JSON body sent to `prepareRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyLayout {
    /// `{attestationType, sourceId, requestBody}` with type and source as
    /// zero-padded 32 byte UTF-8 hex.
    #[default]
    Envelope,
    /// Only the request parameters.
    Bare,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    status: Option<String>,
    abi_encoded_request: Option<String>,
}

/// Asks the verifier to canonicalize a query into an [`EncodedRequest`].
#[derive(Debug, Clone)]
pub struct RequestPreparer {
    transport: HttpTransport,
    chain: String,
    layout: BodyLayout,
}

impl RequestPreparer {
    pub fn new(transport: HttpTransport, chain: impl Into<String>, layout: BodyLayout) -> Self {
        Self {
            transport,
            chain: chain.into(),
            layout,
        }
    }

    pub async fn prepare(
        &self,
        request: &AttestationRequest,
    ) -> Result<EncodedRequest, AttestationError> {
        let path = verifier_path(&self.chain, request.attestation_type(), "prepareRequest");
        let body = self.body(request)?;
        log::info!(
            target: LOG_TARGET,
            "preparing {} request on {} (source {})",
            request.attestation_type(),
            self.chain,
            request.source_id()
        );

        let response = self.transport.post_json(&path, &body).await?;
        if !response.is_success() {
            return Err(response.classify_failure());
        }

        let parsed: PrepareResponse = response.json().map_err(|e| {
            log::error!(target: LOG_TARGET, "verifier answered {} with a non-JSON body", response.status);
            AttestationError::MalformedResponse(format!("prepareRequest body is not JSON: {e}"))
        })?;

        if let Some(failure) = response.embedded_failure() {
            return Err(failure);
        }

        if let Some(status) = parsed.status.as_deref() {
            if status != VALID_STATUS {
                return Err(AttestationError::Rejected(status.to_owned()));
            }
        }

        match parsed.abi_encoded_request {
            Some(token) if !token.trim().is_empty() => {
                let encoded = EncodedRequest(token);
                log::debug!(target: LOG_TARGET, "encoded request: {:?}", encoded);
                Ok(encoded)
            }
            _ => Err(AttestationError::MalformedResponse(
                "prepareRequest response has no abiEncodedRequest".to_owned(),
            )),
        }
    }

    fn body(&self, request: &AttestationRequest) -> Result<Value, AttestationError> {
        Ok(match self.layout {
            BodyLayout::Envelope => json!({
                "attestationType": utf8_hex32(request.attestation_type())?,
                "sourceId": utf8_hex32(request.source_id())?,
                "requestBody": request.parameters(),
            }),
            BodyLayout::Bare => Value::Object(request.parameters().clone()),
        })
    }
}

pub(super) fn verifier_path(chain: &str, attestation_type: &str, action: &str) -> String {
    format!(
        "verifier/{}/{}/{}",
        chain.trim_matches('/'),
        attestation_type.trim_matches('/'),
        action
    )
}

/// `0x` followed by the UTF-8 bytes of `value` right-padded to 32 bytes.
pub(crate) fn utf8_hex32(value: &str) -> Result<String, AttestationError> {
    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        return Err(AttestationError::InvalidRequest(format!(
            "{value:?} does not fit in 32 bytes"
        )));
    }
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(format!("0x{}", hex::encode(word)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::attestation::{TransactionParams, EVM_TRANSACTION};
    use crate::mock::{transport, MockReply, MockServer};
    use crate::transport::AuthScheme;

    const PREPARE: &str = "/verifier/eth/EVMTransaction/prepareRequest";

    fn request() -> AttestationRequest {
        AttestationRequest::transaction(
            EVM_TRANSACTION,
            "testETH",
            TransactionParams::new(format!("0x{}", "4e".repeat(32))),
        )
        .unwrap()
    }

    async fn prepare_against(
        server: &MockServer,
        layout: BodyLayout,
    ) -> Result<EncodedRequest, AttestationError> {
        let preparer = RequestPreparer::new(
            transport(&server.url, AuthScheme::default(), Some("secret")),
            "eth",
            layout,
        );
        preparer.prepare(&request()).await
    }

    #[test]
    fn test_utf8_hex32() {
        assert_eq!(
            utf8_hex32("EVMTransaction").unwrap(),
            "0x45564d5472616e73616374696f6e000000000000000000000000000000000000"
        );
        assert_eq!(utf8_hex32("").unwrap().len(), 66);
        assert!(utf8_hex32(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_verifier_path_has_no_double_slashes() {
        assert_eq!(
            verifier_path("/eth/", "LiquidityEvent", "submitRequest"),
            "verifier/eth/LiquidityEvent/submitRequest"
        );
    }

    #[actix_web::test]
    async fn test_prepare_sends_envelope_and_api_key() {
        let server = MockServer::start().await;
        server.state.script(
            PREPARE,
            vec![MockReply::ok(
                json!({ "status": "VALID", "abiEncodedRequest": "0xabc" }),
            )],
        );

        let encoded = prepare_against(&server, BodyLayout::Envelope).await.unwrap();
        assert_eq!(encoded.as_str(), "0xabc");

        let hits = server.state.hits_on(PREPARE);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].header("x-api-key"), Some("secret"));
        assert_eq!(
            hits[0].body["attestationType"],
            json!(utf8_hex32("EVMTransaction").unwrap())
        );
        assert_eq!(hits[0].body["sourceId"], json!(utf8_hex32("testETH").unwrap()));
        assert_eq!(hits[0].body["requestBody"]["requiredConfirmations"], json!("1"));
    }

    #[actix_web::test]
    async fn test_prepare_bare_layout_sends_parameters_only() {
        let server = MockServer::start().await;
        server.state.script(
            PREPARE,
            vec![MockReply::ok(json!({ "abiEncodedRequest": "0xabc" }))],
        );

        prepare_against(&server, BodyLayout::Bare).await.unwrap();
        let hits = server.state.hits_on(PREPARE);
        assert_eq!(hits[0].body, Value::Object(request().parameters().clone()));
    }

    #[actix_web::test]
    async fn test_prepare_classifies_failures() {
        let cases = vec![
            (
                MockReply::json(401, json!({ "statusCode": 401, "message": "bad key" })),
                "auth",
            ),
            (
                MockReply::ok(json!({ "statusCode": 401, "message": "bad key" })),
                "auth",
            ),
            (
                MockReply::json(400, json!({ "statusCode": 401, "message": "Unauthorized" })),
                "auth",
            ),
            (
                MockReply::ok(json!({ "statusCode": 500, "message": "boom" })),
                "transport",
            ),
            (MockReply::json(502, json!({})), "transport"),
            (MockReply::ok(json!({})), "malformed"),
            (MockReply::ok(json!({ "abiEncodedRequest": "" })), "malformed"),
            (MockReply::raw(200, "<html>"), "malformed"),
            (
                MockReply::ok(json!({ "status": "INVALID: transaction not found" })),
                "rejected",
            ),
        ];

        for (reply, expected) in cases {
            let server = MockServer::start().await;
            server.state.script(PREPARE, vec![reply.clone()]);
            let result = prepare_against(&server, BodyLayout::Envelope).await;
            let kind = match result {
                Err(AttestationError::Auth { .. }) => "auth",
                Err(AttestationError::Transport { .. }) => "transport",
                Err(AttestationError::MalformedResponse(_)) => "malformed",
                Err(AttestationError::Rejected(_)) => "rejected",
                other => panic!("unexpected outcome {other:?} for {reply:?}"),
            };
            assert_eq!(kind, expected, "reply {reply:?}");
        }
    }
}
