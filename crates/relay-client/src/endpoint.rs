//! Endpoint URL normalization.
//!
//! Callers may hand over `http(s)://host[/path]` or `ws(s)://host[/path]`;
//! both transports are derived by scheme swap, and the canonical root
//! segment is appended when it is not already the path tail.

use crate::error::ClientError;
use url::Url;

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ws_url: Url,
    pub http_url: Url,
}

impl Endpoints {
    pub fn normalize(input: &str, root: &str) -> Result<Endpoints, ClientError> {
        let mut url = Url::parse(input)
            .map_err(|e| ClientError::InvalidUrl(format!("{input}: {e}")))?;

        let (ws_scheme, http_scheme) = match url.scheme() {
            "http" | "ws" => ("ws", "http"),
            "https" | "wss" => ("wss", "https"),
            other => {
                return Err(ClientError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )));
            }
        };

        let trimmed = url.path().trim_end_matches('/').to_owned();
        let tail = format!("/{root}");
        let path = if trimmed.ends_with(&tail) {
            trimmed
        } else {
            format!("{trimmed}{tail}")
        };
        url.set_path(&path);

        let mut ws_url = url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|()| ClientError::InvalidUrl(format!("cannot derive ws URL from {input}")))?;
        let mut http_url = url;
        http_url
            .set_scheme(http_scheme)
            .map_err(|()| ClientError::InvalidUrl(format!("cannot derive http URL from {input}")))?;

        Ok(Endpoints { ws_url, http_url })
    }

    /// Build endpoints from explicit per-transport URLs (split deployments).
    pub fn explicit(ws_url: &str, http_url: &str) -> Result<Endpoints, ClientError> {
        let ws_url =
            Url::parse(ws_url).map_err(|e| ClientError::InvalidUrl(format!("{ws_url}: {e}")))?;
        let http_url = Url::parse(http_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{http_url}: {e}")))?;
        Ok(Endpoints { ws_url, http_url })
    }
}
