//! Bounded-time retrieval of the raw feed payload.
//!
//! The [`HttpClient`] trait is the seam for injecting transport behavior in
//! tests; production code uses [`BasicClient`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// Fetches the raw bytes of a feed with a bounded wait.
///
/// Fails closed: a transport error, a timeout, or a non-success status yields
/// an error, never a partial byte buffer.
pub async fn fetch_bytes<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut req = Request::new(reqwest::Method::GET, url.parse()?);
    *req.timeout_mut() = Some(timeout);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
