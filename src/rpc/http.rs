//! HTTP JSON-RPC transport backed by the ethers provider

use super::RpcTransport;
use crate::error::{MeshError, MeshResult};

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError};
use serde_json::error::Category;
use serde_json::Value;
use tracing::debug;

/// JSON-RPC 2.0 over HTTP.
///
/// The provider assigns each request a monotonically increasing id. A node
/// that answers without a usable `result` (an error object, or a well-formed
/// response missing the member) yields `Value::Null`; only failures to reach
/// the node or read its reply are errors.
pub struct HttpTransport {
    url: String,
    provider: Provider<Http>,
}

impl HttpTransport {
    /// Create a transport for `http://host:port`
    pub fn new(host: &str, port: u16) -> MeshResult<Self> {
        let url = format!("http://{}:{}", host, port);
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| MeshError::Config(format!("Invalid RPC url {}: {}", url, e)))?;

        Ok(Self { url, provider })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Vec<Value>) -> MeshResult<Value> {
        match self.provider.request::<_, Value>(method, params).await {
            Ok(result) => Ok(result),
            Err(e) if answered_without_result(&e) => {
                debug!("{} answered {} without a result: {}", self.url, method, e);
                Ok(Value::Null)
            }
            Err(e) => Err(MeshError::RpcTransport {
                endpoint: self.url.clone(),
                method: method.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Whether the node replied with a JSON-RPC envelope that carried no result.
///
/// Error objects count, as do JSON documents that lack the `result` member.
/// Bodies that are not JSON at all are treated as transport failures.
fn answered_without_result(err: &ProviderError) -> bool {
    match err {
        ProviderError::JsonRpcClientError(e) => {
            e.as_error_response().is_some()
                || e.as_serde_error()
                    .map_or(false, |e| e.classify() == Category::Data)
        }
        ProviderError::SerdeJson(e) => e.classify() == Category::Data,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcClient;
    use axum::{http::header, routing::post, Router};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Serve `body` for every POST on a local port and return a client for it
    async fn client_for_reply(body: &'static str) -> RpcClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = Router::new().route(
            "/",
            post(move || async move { ([(header::CONTENT_TYPE, "application/json")], body) }),
        );
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let transport = HttpTransport::new("127.0.0.1", port).unwrap();
        RpcClient::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn test_result_member_is_returned() {
        let client =
            client_for_reply(r#"{"jsonrpc":"2.0","id":1,"result":"enode://a@h:1"}"#).await;
        assert_eq!(
            client.call_string("parity_enode", vec![]).await.unwrap(),
            "enode://a@h:1"
        );
    }

    #[tokio::test]
    async fn test_replies_without_result_are_empty_results() {
        let replies = [
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#,
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#,
        ];
        for reply in replies {
            let client = client_for_reply(reply).await;
            let err = client.call_map("admin_nodeInfo", vec![]).await.unwrap_err();
            let empty = matches!(
                err,
                MeshError::RpcEmptyResult { ref method, .. } if method == "admin_nodeInfo"
            );
            assert!(empty, "{reply} gave {err}");
        }
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RpcClient::new(Arc::new(HttpTransport::new("127.0.0.1", port).unwrap()));

        let err = client.call_string("parity_enode", vec![]).await.unwrap_err();
        assert!(matches!(err, MeshError::RpcTransport { .. }));
    }

    #[tokio::test]
    async fn test_non_json_reply_is_transport_error() {
        let client = client_for_reply("<html>bad gateway</html>").await;
        let err = client.call_string("parity_enode", vec![]).await.unwrap_err();
        assert!(matches!(err, MeshError::RpcTransport { .. }));
    }

    #[test]
    fn test_builds_url_from_host_and_port() {
        let transport = HttpTransport::new("127.0.0.1", 8551).unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:8551");
    }

    #[test]
    fn test_rejects_unparseable_host() {
        assert!(HttpTransport::new("not a host", 8545).is_err());
    }
}
