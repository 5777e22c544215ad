// REST document store
//
// Speaks the JSON-tree REST dialect: every node is addressable as
// `<base>/<path>.json`, `POST` to a collection creates a child with a
// generated key, and the same URL opened with `Accept: text/event-stream`
// streams `put`/`patch` events for the subtree. An optional database secret
// or ID token goes in the `auth` query parameter.

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use super::sse::{SseDecoder, StreamUpdate, apply_patch, apply_put};
use super::{DocumentStore, DocumentStream};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Reply body of a collection `POST`.
#[derive(Debug, Deserialize)]
struct PushReply {
    name: String,
}

/// [`DocumentStore`] over the relay's REST + SSE interface.
pub struct RestDocumentStore {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    auth: Option<SecretString>,
}

impl RestDocumentStore {
    /// Create a store rooted at `base_url`.
    pub fn new(
        base_url: Url,
        auth: Option<SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_clients(
            transport.build_client()?,
            transport.build_streaming_client()?,
            base_url,
            auth,
        ))
    }

    /// Create a store from pre-built clients. `stream_http` must not carry
    /// a total request timeout.
    pub fn with_clients(
        http: reqwest::Client,
        stream_http: reqwest::Client,
        mut base_url: Url,
        auth: Option<SecretString>,
    ) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http,
            stream_http,
            base_url,
            auth,
        }
    }

    /// The relay root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `<base>/<path>.json[?auth=<token>]`
    fn node_url(&self, path: &str) -> Result<Url, Error> {
        let path = path.trim_matches('/');
        let mut url = self.base_url.join(&format!("{path}.json"))?;
        if let Some(token) = &self.auth {
            url.query_pairs_mut()
                .append_pair("auth", token.expose_secret());
        }
        Ok(url)
    }

    // ── Response helpers ─────────────────────────────────────────────

    fn check_status(resp: &reqwest::Response, path: &str) -> Result<(), Error> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            // The URL may carry the token; report the node path instead.
            return Err(Error::Status {
                status: status.as_u16(),
                url: path.to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, Error> {
        let url = self.node_url(path)?;
        debug!(path, "GET document");

        let resp = self.http.get(url).send().await?;
        Self::check_status(&resp, path)?;

        let body = resp.text().await?;
        let value: Value = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn append(&self, collection: &str, document: Value) -> Result<String, Error> {
        let url = self.node_url(collection)?;
        debug!(collection, "POST document");

        let resp = self.http.post(url).json(&document).send().await?;
        Self::check_status(&resp, collection)?;

        let body = resp.text().await?;
        let reply: PushReply = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;
        Ok(reply.name)
    }

    async fn subscribe(&self, path: &str) -> Result<DocumentStream, Error> {
        let url = self.node_url(path)?;
        debug!(path, "opening event stream");

        let resp = self
            .stream_http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        Self::check_status(&resp, path)?;

        Ok(Box::pin(document_events(resp, path.to_owned())))
    }
}

// ── Event stream ─────────────────────────────────────────────────────

/// Fold `put`/`patch` events into a local copy of the node and yield it
/// after every update.
fn document_events(
    resp: reqwest::Response,
    path: String,
) -> impl Stream<Item = Result<Value, Error>> + Send {
    async_stream::try_stream! {
        let mut bytes = resp.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut document = Value::Null;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                match event.event.as_str() {
                    "put" | "patch" => {
                        let update: StreamUpdate = serde_json::from_str(&event.data)
                            .map_err(|e| Error::Deserialization {
                                message: e.to_string(),
                                body: event.data.clone(),
                            })?;
                        if event.event == "put" {
                            apply_put(&mut document, &update.path, update.data);
                        } else {
                            apply_patch(&mut document, &update.path, update.data);
                        }
                        yield document.clone();
                    }
                    "keep-alive" => trace!(%path, "event stream keep-alive"),
                    "cancel" => {
                        warn!(%path, "event stream cancelled by relay");
                        Err::<(), Error>(Error::StreamEnded("cancelled by relay".into()))?;
                    }
                    "auth_revoked" => {
                        warn!(%path, "event stream credentials revoked");
                        Err::<(), Error>(Error::Unauthorized)?;
                    }
                    other => trace!(%path, event = other, "ignoring event"),
                }
            }
        }
        debug!(%path, "event stream closed");
    }
}
