//! HTTP client abstraction for registry and tarball fetches
//!
//! A small trait so the fetcher can run against a mock in tests. The default
//! implementation uses `reqwest` with a two-minute request timeout.

use crate::errors::{FetchError, GodevError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// A fetched HTTP response. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Minimal GET-only HTTP client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse>;
}

/// Default client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                GodevError::Fetch(FetchError::Download {
                    message: format!("failed to build HTTP client: {}", e),
                })
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            GodevError::Fetch(FetchError::Download {
                message: format!("GET {}: {}", url, e),
            })
        })?;
        let status = response.status().as_u16();
        let mut header_map = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                header_map.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }
        let body = response.bytes().await.map_err(|e| {
            GodevError::Fetch(FetchError::Download {
                message: format!("GET {}: {}", url, e),
            })
        })?;
        Ok(HttpResponse {
            status,
            headers: header_map,
            body,
        })
    }
}

/// Scripted client for tests: responses are matched by exact URL and served
/// in registration order.
#[cfg(test)]
#[derive(Default)]
pub struct MockHttpClient {
    responses: std::sync::Mutex<HashMap<String, Vec<HttpResponse>>>,
    requests: std::sync::Mutex<Vec<(String, Vec<(String, String)>)>>,
}

#[cfg(test)]
impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(response);
    }

    pub fn ok(&self, url: &str, body: impl Into<Bytes>) {
        self.expect(
            url,
            HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: body.into(),
            },
        );
    }

    pub fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec()));
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(url).ok_or_else(|| {
            GodevError::Fetch(FetchError::Download {
                message: format!("unexpected request: {}", url),
            })
        })?;
        if queue.is_empty() {
            return Err(GodevError::Fetch(FetchError::Download {
                message: format!("no responses left for {}", url),
            }));
        }
        Ok(queue.remove(0))
    }
}
