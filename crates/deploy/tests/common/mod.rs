//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::{Value, json};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate, matchers::method};

/// Initialize tracing for tests (idempotent).
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// A minimal JSON-RPC node: answers `eth_blockNumber` and `eth_getCode`.
pub struct RpcStub {
    server: MockServer,
    code: Arc<Mutex<HashMap<String, String>>>,
}

impl RpcStub {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let code = Arc::new(Mutex::new(HashMap::new()));

        Mock::given(method("POST"))
            .respond_with(JsonRpcResponder { code: code.clone() })
            .mount(&server)
            .await;

        Self { server, code }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Set the bytecode returned for `address` (any case).
    pub fn set_code(&self, address: &str, code: &str) {
        self.code
            .lock()
            .unwrap()
            .insert(address.to_lowercase(), code.to_string());
    }
}

/// Answers by JSON-RPC method; unknown addresses have no code.
struct JsonRpcResponder {
    code: Arc<Mutex<HashMap<String, String>>>,
}

impl Respond for JsonRpcResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(request) = request.body_json::<Value>() else {
            return ResponseTemplate::new(400);
        };
        let id = request["id"].clone();

        let body = match request["method"].as_str() {
            Some("eth_blockNumber") => json!({"jsonrpc": "2.0", "id": id, "result": "0x1"}),
            Some("eth_getCode") => {
                let address = request["params"][0]
                    .as_str()
                    .unwrap_or_default()
                    .to_lowercase();
                let code = self
                    .code
                    .lock()
                    .unwrap()
                    .get(&address)
                    .cloned()
                    .unwrap_or_else(|| "0x".to_string());
                json!({"jsonrpc": "2.0", "id": id, "result": code})
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "method not found"}
            }),
        };

        ResponseTemplate::new(200).set_body_json(body)
    }
}
