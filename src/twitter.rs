use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use std::time::Duration;

const SERVICE: &str = "twitter";
const SAMPLE_STREAM_PATH: &str = "/2/tweets/sample/stream";
const SAMPLE_STREAM_QUERY: [(&str, &str); 3] = [
    ("expansions", "geo.place_id"),
    ("tweet.fields", "created_at,geo"),
    ("place.fields", "geo"),
];

/// Opens new sessions on a line-oriented live feed.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Each call starts an independent session; no stream position carries
    /// over from earlier sessions.
    async fn connect(&self) -> Result<Box<dyn LineStream>, FetchError>;
}

/// One open session. Yields complete lines until the feed ends.
#[async_trait]
pub trait LineStream: Send {
    async fn next_line(&mut self) -> Result<Option<String>, FetchError>;
}

pub struct TwitterClient {
    http: Client,
    base_url: String,
}

impl TwitterClient {
    pub fn new(bearer_token: &str, base_url: &str, connect_timeout: Duration) -> Result<Self, FetchError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {bearer_token}")).map_err(|err| {
            FetchError::Request {
                service: SERVICE,
                message: format!("invalid bearer token: {err}"),
            }
        })?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        // No overall timeout: the sample stream is meant to stay open.
        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| FetchError::from_reqwest(SERVICE, err))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StreamConnector for TwitterClient {
    async fn connect(&self) -> Result<Box<dyn LineStream>, FetchError> {
        let url = format!("{}{}", self.base_url, SAMPLE_STREAM_PATH);
        let response = self
            .http
            .get(&url)
            .query(&SAMPLE_STREAM_QUERY)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(SERVICE, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(%url, "connected to sample stream");
        Ok(Box::new(HttpLineStream::new(response)))
    }
}

/// Splits a chunked HTTP body into lines.
pub struct HttpLineStream {
    response: Response,
    pending: Vec<u8>,
    finished: bool,
}

impl HttpLineStream {
    fn new(response: Response) -> Self {
        Self {
            response,
            pending: Vec::new(),
            finished: false,
        }
    }
}

#[async_trait]
impl LineStream for HttpLineStream {
    async fn next_line(&mut self) -> Result<Option<String>, FetchError> {
        loop {
            if let Some(line) = take_line(&mut self.pending, self.finished) {
                if line.trim().is_empty() {
                    tracing::trace!("keep-alive line");
                    continue;
                }
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.pending.extend_from_slice(&bytes),
                Ok(None) => self.finished = true,
                Err(err) => return Err(FetchError::from_reqwest(SERVICE, err)),
            }
        }
    }
}

/// Removes the first complete line from `pending`. Once the body is finished
/// any unterminated remainder counts as a line.
fn take_line(pending: &mut Vec<u8>, finished: bool) -> Option<String> {
    let line = match pending.iter().position(|b| *b == b'\n') {
        Some(pos) => {
            let mut line: Vec<u8> = pending.drain(..=pos).collect();
            line.pop();
            line
        }
        None if finished && !pending.is_empty() => std::mem::take(pending),
        None => return None,
    };
    let text = String::from_utf8_lossy(&line);
    Some(text.trim_end().to_string())
}
