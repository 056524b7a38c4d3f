//! Purpose: Blocking HTTP client for a running `pagesync serve` instance.
//! Exports: `RemoteClient`, `RemoteListPages`.
//! Role: Mirrors the server routes so tests and tools can walk continuation chains.
//! Invariants: Error envelopes from the server are mapped back onto `ErrorKind`.
//! Invariants: Tokens are passed through untouched; the client never decodes them.
use super::list::{ListQuery, ListResponse};
use crate::core::error::{Error, ErrorKind};
use crate::core::table::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct RecordEnvelope {
    record: Record,
}

#[derive(Deserialize)]
struct DeletedEnvelope {
    deleted: u64,
}

#[derive(Deserialize)]
struct ClearEnvelope {
    affected_rows: usize,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
}

#[derive(Serialize)]
struct InsertRequest<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteRequest {
    id: u64,
}

#[derive(Serialize)]
struct Empty {}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner { base_url, agent }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn list(&self, query: &ListQuery) -> ApiResult<ListResponse> {
        let mut url = build_url(&self.inner.base_url, &["list"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(token) = &query.sync_token {
                pairs.append_pair("sync_token", token);
            }
            if let Some(token) = &query.next_page_token {
                pairs.append_pair("next_page_token", token);
            }
            if let Some(max_results) = &query.max_results {
                pairs.append_pair("max_results", max_results);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.request_json("GET", &url, &Empty {})
    }

    /// Follow next-page tokens from `start` until a sync token is issued.
    pub fn list_pages(&self, start: ListQuery) -> RemoteListPages<'_> {
        RemoteListPages {
            client: self,
            next: Some(start),
        }
    }

    pub fn insert(&self, name: &str, email: &str) -> ApiResult<Record> {
        let url = build_url(&self.inner.base_url, &["insert"])?;
        let envelope: RecordEnvelope =
            self.request_json("POST", &url, &InsertRequest { name, email })?;
        Ok(envelope.record)
    }

    pub fn update(&self, id: u64, name: Option<&str>, email: Option<&str>) -> ApiResult<Record> {
        let url = build_url(&self.inner.base_url, &["update"])?;
        let envelope: RecordEnvelope =
            self.request_json("POST", &url, &UpdateRequest { id, name, email })?;
        Ok(envelope.record)
    }

    pub fn delete(&self, id: u64) -> ApiResult<u64> {
        let url = build_url(&self.inner.base_url, &["delete"])?;
        let envelope: DeletedEnvelope = self.request_json("POST", &url, &DeleteRequest { id })?;
        Ok(envelope.deleted)
    }

    pub fn clear(&self) -> ApiResult<usize> {
        let url = build_url(&self.inner.base_url, &["clear"])?;
        let envelope: ClearEnvelope = self.request_json("POST", &url, &Empty {})?;
        Ok(envelope.affected_rows)
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = if method == "GET" {
            request.call()
        } else {
            let payload = serde_json::to_string(body).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode request json")
                    .with_source(err)
            })?;
            request
                .set("Content-Type", "application/json")
                .send_string(&payload)
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Internal)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

/// Iterator over the pages of one pass; ends after the page carrying a sync token.
pub struct RemoteListPages<'a> {
    client: &'a RemoteClient,
    next: Option<ListQuery>,
}

impl Iterator for RemoteListPages<'_> {
    type Item = ApiResult<ListResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        let query = self.next.take()?;
        let page = match self.client.list(&query) {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };
        if let Some(token) = &page.next_page_token {
            self.next = Some(ListQuery {
                sync_token: None,
                next_page_token: Some(token.clone()),
                max_results: query.max_results,
            });
        }
        Some(Ok(page))
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("base url must use http or https scheme")
        );
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("base url must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::new(ErrorKind::Usage).with_message("base url cannot be a base"))?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error, status);
    }
    Error::new(error_kind_from_status(status)).with_message(format!("remote error status {status}"))
}

fn error_from_remote(remote: RemoteError, status: u16) -> Error {
    let kind = ErrorKind::parse(&remote.kind).unwrap_or_else(|| error_kind_from_status(status));
    let mut err = Error::new(kind);
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    err
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 422 => ErrorKind::Usage,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}
