use std::time::Duration;

use log::{debug, error, warn};
use reqwest::{blocking::Client, StatusCode};
use thiserror::Error;

use crate::document::{sanitize, ParsedDocument};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid response received: {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("error executing request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("malformed XML document: {0}")]
    Malformed(#[from] roxmltree::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e)
        }
    }
}

/// Anything poll jobs can pull a document from.
pub trait DocumentSource: Send {
    /// `None` covers every failure and the empty document alike.
    fn fetch(&self, url: &str) -> Option<ParsedDocument>;
}

#[derive(Clone, Debug)]
pub struct XmlFetcher {
    client: Client,
}

impl XmlFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// `Ok(None)` when the body is empty once non-ASCII bytes are removed.
    pub fn try_fetch(&self, url: &str) -> Result<Option<ParsedDocument>, FetchError> {
        debug!("GET {url}");
        let response = self.client.get(url).send()?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.bytes()?;
        let text = sanitize(&body);
        if text.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(ParsedDocument::parse(&text)?))
    }
}

impl DocumentSource for XmlFetcher {
    fn fetch(&self, url: &str) -> Option<ParsedDocument> {
        match self.try_fetch(url) {
            Ok(document) => document,
            Err(FetchError::Timeout) => {
                warn!("Request to {url} timed out, skipping");
                None
            }
            Err(e) => {
                error!("{url}: {e}");
                None
            }
        }
    }
}
