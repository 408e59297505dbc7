//! Direct-URL resolver.
//!
//! Streams `http`/`https` resources with `reqwest`, exposing the response
//! body as an async reader for the fetch stage.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use leech_engine::{FetchError, Resolved, Resolver};
use leech_protocol::Source;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use reqwest::header::CONTENT_DISPOSITION;
use tokio_util::io::StreamReader;
use tracing::debug;

const USER_AGENT: &str = concat!("leechd/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name used when neither the headers nor the URL carry one.
const FALLBACK_NAME: &str = "download.bin";

/// Resolver for plain HTTP(S) downloads.
pub struct HttpResolver {
    http: reqwest::Client,
}

impl HttpResolver {
    /// Creates a resolver with its own connection pool.
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn open(&self, source: &Source) -> Result<Resolved, FetchError> {
        let url = parse_url(&source.url)?;
        if let Some(format) = &source.format {
            debug!(format = %format, "format selector ignored for direct downloads");
        }

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let advertised_size = resp.content_length().unwrap_or(0);
        let suggested_name = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| name_from_url(&url));

        debug!(%url, status = status.as_u16(), advertised_size, name = %suggested_name, "response received");

        let stream = resp.bytes_stream().map(|r| r.map_err(std::io::Error::other));
        Ok(Resolved {
            reader: Box::new(StreamReader::new(Box::pin(stream))),
            advertised_size,
            suggested_name,
        })
    }
}

impl Resolver for HttpResolver {
    fn resolve<'a>(
        &'a self,
        source: &'a Source,
    ) -> Pin<Box<dyn Future<Output = Result<Resolved, FetchError>> + Send + 'a>> {
        Box::pin(self.open(source))
    }
}

/// Accepts only absolute `http`/`https` URLs.
fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidSource(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidSource(format!(
            "unsupported scheme {other:?}"
        ))),
    }
}

/// Last non-empty path segment, percent-decoded.
fn name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// `filename=` parameter of a `Content-Disposition` header.
fn filename_from_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}
