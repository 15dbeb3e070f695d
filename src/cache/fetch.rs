//! Purpose: Network seam for the asset cache manager.
//! Exports: `FetchRequest`, `FetchResponse`, `Fetch`, `UreqFetcher`.
//! Role: Captured request/response pairs are what generations persist; the
//! trait lets tests substitute the network.
//! Invariants: Non-2xx statuses are responses, not errors; only transport
//! failures surface as `ErrorKind::Network`.

use std::io::Read;

use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Request identity as the cache sees it: method + URL, plus whether the
/// shell issued it as a page navigation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub navigate: bool,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            navigate: false,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            navigate: true,
            ..Self::get(url)
        }
    }

    pub fn with_method(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            navigate: false,
        }
    }
}

/// Captured response: status line, headers, raw body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub trait Fetch: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;
}

/// Blocking HTTP fetcher over a shared ureq agent.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for UreqFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let response = self
            .agent
            .request(&request.method, request.url.as_str())
            .call();
        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(Error::new(ErrorKind::Network)
                    .with_message("network fetch failed")
                    .with_url(request.url.as_str())
                    .with_source(err));
            }
        };
        capture(response, &request.url)
    }
}

fn capture(response: ureq::Response, url: &Url) -> Result<FetchResponse, Error> {
    let status = response.status();
    let headers = response
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            response
                .header(&name)
                .map(|value| (name.clone(), value.to_string()))
        })
        .collect();
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|err| {
            Error::new(ErrorKind::Network)
                .with_message("failed to read response body")
                .with_url(url.as_str())
                .with_source(err)
        })?;
    Ok(FetchResponse {
        status,
        headers,
        body,
    })
}
