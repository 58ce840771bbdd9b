//! Source material loading: fetches PDFs and web pages and turns them into text.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Upper bound on any fetched document.
pub const MAX_SOURCE_BYTES: usize = 20 * 1024 * 1024;
/// Text sent to the model is truncated to this many characters.
pub const MAX_SOURCE_CHARS: usize = 60_000;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("document at {url} is larger than {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("could not read text from PDF: {0}")]
    Pdf(String),
}

/// Fetches raw bytes for a URL. Implemented over HTTP in production and by fakes in tests.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let fetch_err = |message: String| SourceError::Fetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        if response
            .content_length()
            .is_some_and(|len| len as usize > MAX_SOURCE_BYTES)
        {
            return Err(SourceError::TooLarge {
                url: url.to_string(),
                limit: MAX_SOURCE_BYTES,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if bytes.len() > MAX_SOURCE_BYTES {
            return Err(SourceError::TooLarge {
                url: url.to_string(),
                limit: MAX_SOURCE_BYTES,
            });
        }

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// Local text extraction, used when the model cannot take the PDF directly.
fn pdf_to_text(bytes: &[u8]) -> Result<String, SourceError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| SourceError::Pdf(e.to_string()))?;
    let text = collapse_whitespace(&text);
    if text.is_empty() {
        return Err(SourceError::Pdf("no extractable text".to_string()));
    }
    Ok(truncate_chars(&text, MAX_SOURCE_CHARS))
}

/// Runs `pdf_to_text` on the blocking pool. A parser panic on a malformed file comes
/// back as `SourceError::Pdf`.
pub async fn extract_pdf_text(bytes: Vec<u8>) -> Result<String, SourceError> {
    tokio::task::spawn_blocking(move || pdf_to_text(&bytes))
        .await
        .map_err(|e| SourceError::Pdf(format!("PDF parser stopped: {e}")))?
}

/// Strips markup from an HTML page, skipping `<script>` and `<style>` bodies.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        out.push(' ');
        let tag_and_after = &rest[open..];
        let Some(close) = tag_and_after.find('>') else {
            rest = "";
            break;
        };
        let tag = tag_and_after[1..close].trim().to_ascii_lowercase();
        rest = &tag_and_after[close + 1..];

        for skipped in ["script", "style"] {
            if tag == skipped || tag.starts_with(&format!("{skipped} ")) {
                let end_tag = format!("</{skipped}");
                rest = match rest.to_ascii_lowercase().find(&end_tag) {
                    Some(end) => &rest[end..],
                    None => "",
                };
            }
        }
    }
    out.push_str(rest);

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    truncate_chars(&collapse_whitespace(&decoded), MAX_SOURCE_CHARS)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;

    use super::*;

    /// Serves fixed bodies keyed by URL; any other URL fails to fetch.
    #[derive(Default)]
    pub struct StaticFetcher {
        pub bodies: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
            self.bodies.get(url).cloned().ok_or_else(|| SourceError::Fetch {
                url: url.to_string(),
                message: "HTTP 404 Not Found".to_string(),
            })
        }
    }
}
