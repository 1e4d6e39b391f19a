//! Blocking HTTP client shared by the language-model providers and the cover fetcher.

use std::time::Duration;

const DEFAULT_USER_AGENT: &str = concat!("bookgen/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_REDIRECTS: usize = 10;

/// Blocking HTTP client with a fixed timeout and user agent.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: reqwest::blocking::Client,
}

impl ApiClient {
    /// Build a client with default User-Agent and timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Perform a GET request.
    pub fn get(&self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        self.inner.get(url).send()
    }

    /// POST a JSON body with extra headers.
    pub fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let mut request = self.inner.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send()
    }
}

/// Builder for [ApiClient].
#[derive(Debug)]
pub struct ApiClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ApiClientBuilder {
    /// Set a custom User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set request timeout in seconds. Default 120.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(ApiClient { inner })
    }
}
