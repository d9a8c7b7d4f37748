use std::io::Read;
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RANGE, USER_AGENT};

use crate::error::PrepError;
use crate::fetch::FetchPolicy;

/// An opened GET whose body has not been read yet.
pub struct HttpBody {
    pub status: u16,
    pub reader: Box<dyn Read + Send>,
}

impl HttpBody {
    pub fn is_partial(&self) -> bool {
        self.status == StatusCode::PARTIAL_CONTENT.as_u16()
    }
}

pub trait HttpSource: Send + Sync {
    /// Opens a streaming GET. `offset` asks for `Range: bytes=<offset>-`.
    /// Any status is returned as-is; callers decide what is a failure.
    fn open(&self, url: &str, offset: Option<u64>) -> Result<HttpBody, PrepError>;

    /// Whole-body GET; non-2xx is an error.
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, PrepError>;
}

/// Blocking wait between fetch attempts.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone)]
pub struct ReqwestSource {
    client: Client,
    github_token: Option<String>,
}

impl ReqwestSource {
    pub fn new(policy: &FetchPolicy) -> Result<Self, PrepError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mpat-prep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PrepError::Http(err.to_string()))?,
        );

        // Read timeout applies per body read, so long transfers are fine.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(policy.connect_timeout)
            .timeout(policy.read_timeout)
            .build()
            .map_err(|err| PrepError::Http(err.to_string()))?;

        let github_token = std::env::var("GITHUB_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        Ok(Self {
            client,
            github_token,
        })
    }

    fn request(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let request = self.client.get(url);
        match &self.github_token {
            Some(token) if url.starts_with("https://api.github.com/") => {
                request.header(AUTHORIZATION, format!("Bearer {token}"))
            }
            _ => request,
        }
    }
}

impl HttpSource for ReqwestSource {
    fn open(&self, url: &str, offset: Option<u64>) -> Result<HttpBody, PrepError> {
        let mut request = self.request(url);
        if let Some(offset) = offset {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .map_err(|err| PrepError::Http(err.to_string()))?;
        Ok(HttpBody {
            status: response.status().as_u16(),
            reader: Box::new(response),
        })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, PrepError> {
        let response = self
            .request(url)
            .send()
            .map_err(|err| PrepError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(PrepError::HttpStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| PrepError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
