//! HTTP gateway implementation.
//!
//! The actual HTTP client is abstracted via a trait so the embedding app
//! can supply its own stack (reqwest, hyper, a platform bridge, ...).
//! Bodies are JSON.

use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use lexisync_protocol::{
    ChangeSet, ChangesSinceRequest, ListPage, ListRequest, PushRequest, PushResult,
};
use parking_lot::RwLock;
use std::future::Future;
use tracing::warn;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>)
        -> impl Future<Output = Result<Vec<u8>, String>> + Send;
}

/// HTTP-based remote gateway.
///
/// Endpoints, relative to the base URL:
///
/// - `GET /{collection}?page=&limit=&search=&partOfSpeech=`
/// - `GET /{collection}/changes?since=`
/// - `POST /sync/push`
pub struct HttpGateway<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpGateway<C> {
    /// Creates a new HTTP gateway.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn list_url(&self, request: &ListRequest) -> String {
        let mut pairs = vec![
            ("page", request.page.to_string()),
            ("limit", request.limit.to_string()),
        ];
        pairs.extend(request.filter.query_pairs());
        format!(
            "{}/{}?{}",
            self.base_url,
            request.collection,
            encode_query(&pairs)
        )
    }

    fn changes_url(&self, request: &ChangesSinceRequest) -> String {
        format!(
            "{}/{}/changes?since={}",
            self.base_url,
            request.collection,
            request.since.as_millis()
        )
    }

    fn record(&self, result: Result<Vec<u8>, String>, url: &str) -> SyncResult<Vec<u8>> {
        match result {
            Ok(body) => {
                *self.last_error.write() = None;
                Ok(body)
            }
            Err(e) => {
                warn!(url, error = %e, "http request failed");
                *self.last_error.write() = Some(e.clone());
                Err(SyncError::transport_retryable(e))
            }
        }
    }
}

impl<C: HttpClient> RemoteGateway for HttpGateway<C> {
    async fn list(&self, request: &ListRequest) -> SyncResult<ListPage> {
        let url = self.list_url(request);
        let body = self.record(self.client.get(&url).await, &url)?;
        Ok(ListPage::decode(&body, request.collection)?)
    }

    async fn changes_since(&self, request: &ChangesSinceRequest) -> SyncResult<ChangeSet> {
        let url = self.changes_url(request);
        let body = self.record(self.client.get(&url).await, &url)?;
        Ok(ChangeSet::decode(&body, request.collection)?)
    }

    async fn push_pending(&self, request: &PushRequest) -> SyncResult<PushResult> {
        let url = format!("{}/sync/push", self.base_url);
        let payload = request.encode()?;
        let body = self.record(self.client.post(&url, payload).await, &url)?;
        Ok(PushResult::decode(&body)?)
    }
}

fn encode_query(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::{CollectionId, Entity, ListFilter, Timestamp, Vocabulary};
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestClient {
        responses: RwLock<HashMap<String, Vec<u8>>>,
        requests: RwLock<Vec<String>>,
    }

    impl TestClient {
        fn respond(&self, url: &str, body: Vec<u8>) {
            self.responses.write().insert(url.to_string(), body);
        }

        fn answer(&self, url: &str) -> Result<Vec<u8>, String> {
            self.requests.write().push(url.to_string());
            self.responses
                .read()
                .get(url)
                .cloned()
                .ok_or_else(|| format!("connection refused: {url}"))
        }
    }

    impl HttpClient for TestClient {
        async fn get(&self, url: &str) -> Result<Vec<u8>, String> {
            self.answer(url)
        }

        async fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.answer(url)
        }
    }

    fn vocab(id: &str) -> Entity {
        Entity::vocabulary(
            id,
            Timestamp(1),
            Vocabulary {
                word: id.into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn urls() {
        let gateway = HttpGateway::new("https://api.example.com/", TestClient::default());
        assert_eq!(gateway.base_url(), "https://api.example.com");

        let request = ListRequest::new(CollectionId::Vocabularies, 2, 50).with_filter(
            ListFilter::none()
                .with_search("buenos días")
                .with_part_of_speech("noun"),
        );
        assert_eq!(
            gateway.list_url(&request),
            "https://api.example.com/vocabularies?page=2&limit=50\
             &search=buenos%20d%C3%ADas&partOfSpeech=noun"
        );

        let changes = ChangesSinceRequest::new(CollectionId::Resources, Timestamp(1234));
        assert_eq!(
            gateway.changes_url(&changes),
            "https://api.example.com/resources/changes?since=1234"
        );
    }

    #[tokio::test]
    async fn list_decodes_page() {
        let client = TestClient::default();
        let page = ListPage::new(vec![vocab("v1")], 1);
        client.respond(
            "https://api.example.com/vocabularies?page=0&limit=10",
            page.encode().unwrap(),
        );

        let gateway = HttpGateway::new("https://api.example.com", client);
        let got = gateway
            .list(&ListRequest::new(CollectionId::Vocabularies, 0, 10))
            .await
            .unwrap();
        assert_eq!(got, page);
        assert!(gateway.last_error().is_none());
    }

    #[tokio::test]
    async fn client_failure_is_retryable_transport() {
        let gateway = HttpGateway::new("https://api.example.com", TestClient::default());
        let err = gateway
            .changes_since(&ChangesSinceRequest::new(
                CollectionId::Vocabularies,
                Timestamp::EPOCH,
            ))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(gateway.last_error().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn undecodable_body_is_parse_error() {
        let client = TestClient::default();
        client.respond("https://api.example.com/sync/push", b"<html>".to_vec());

        let gateway = HttpGateway::new("https://api.example.com", client);
        let err = gateway
            .push_pending(&PushRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }
}
