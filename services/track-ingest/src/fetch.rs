//!
//! src/fetch.rs  Oct 18th, 2026
//!
//! Builds the http clients and request builders for every endpoint the
//! service hits. Nothing here sends; callers decide on retry policy.
//!

use url::Url;
use reqwest::{Client, header, redirect, RequestBuilder};

use crate::config::{DiscoveryConfig, HttpConfig};
use crate::IngestError;

/// Browsers get the full results page; anything else gets a consent wall
const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0 Safari/537.36";

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder  {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn client_with_headers(http: &HttpConfig, headers: header::HeaderMap) ->
    Result<Client, IngestError> {
    client_helper(http)
        .default_headers(headers)
        .build()
        .map_err(|e| IngestError::Http(format!("build client: {e}")))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, IngestError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_with_headers(http, h)
}

fn join(base: &Url, path: &str) -> Result<Url, IngestError> {
    base.join(path)
        .map_err(|e| IngestError::Config(format!("join {path} onto {base}: {e}")))
}

#[derive(Clone, Debug)]
pub struct DeezerClient {
    pub http: Client,
    pub base: Url
}

impl DeezerClient {
    pub fn new(http_config: &HttpConfig, cfg: &DiscoveryConfig) ->
        Result<Self, IngestError> {
        let http = base_client(http_config)?;
        Ok( Self { http, base: cfg.deezer_base.clone() })
    }

    /// GET /search?q=...
    pub fn search(&self, query: &str) -> Result<RequestBuilder, IngestError> {
        let url = join(&self.base, "search")?;
        Ok(self.http.get(url).query(&[("q", query)]))
    }
}

#[derive(Clone, Debug)]
pub struct YoutubeClient {
    pub http: Client,
    pub base: Url
}

impl YoutubeClient {
    pub fn new(http_config: &HttpConfig, cfg: &DiscoveryConfig) ->
        Result<Self, IngestError> {
        let mut h = header::HeaderMap::new();
        h.insert(header::ACCEPT, header::HeaderValue::from_static("text/html"));
        h.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9")
        );
        let http = client_helper(http_config)
            .default_headers(h)
            .user_agent(BROWSER_AGENT)
            .build()
            .map_err(|e| IngestError::Http(format!("build client: {e}")))?;
        Ok( Self { http, base: cfg.youtube_base.clone() })
    }

    /// GET /results?search_query=...
    pub fn results(&self, query: &str) -> Result<RequestBuilder, IngestError> {
        let url = join(&self.base, "results")?;
        Ok(self.http.get(url).query(&[("search_query", query)]))
    }
}
