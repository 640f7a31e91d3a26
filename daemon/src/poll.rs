use std::time::Duration;

use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{redirect, Client, StatusCode};
use url::Url;

use crate::config::HttpConfig;
use crate::error::FetchError;

/// HTTP validators from the most recent successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheTokens {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug)]
pub enum PollOutcome {
    /// 304: nothing changed since the validators were issued.
    NotModified,
    Fresh {
        body: String,
        tokens: CacheTokens,
        status: u16,
    },
}

/// Conditional-GET client shared by every watch.
#[derive(Clone)]
pub struct PollClient {
    http: Client,
}

impl PollClient {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()?;
        Ok(Self { http })
    }

    /// Fetches `target`, sending `If-None-Match` / `If-Modified-Since` when known.
    ///
    /// On 2xx the returned tokens take the server's new validators, keeping the
    /// previous value for any header the server omitted.
    pub async fn poll(&self, target: &Url, tokens: &CacheTokens) -> Result<PollOutcome, FetchError> {
        let mut request = self.http.get(target.clone());
        if let Some(etag) = &tokens.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = &tokens.last_modified {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(PollOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let fresh_tokens = CacheTokens {
            etag: header(ETAG).or_else(|| tokens.etag.clone()),
            last_modified: header(LAST_MODIFIED).or_else(|| tokens.last_modified.clone()),
        };
        let body = response.text().await?;

        Ok(PollOutcome::Fresh {
            body,
            tokens: fresh_tokens,
            status: status.as_u16(),
        })
    }
}
