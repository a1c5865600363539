//! Resource Transport
//!
//! Blocking HTTP transport behind the `Transport` trait. The trait seam
//! keeps the fetch stage independent of real sockets: tests drive the
//! pipeline with in-memory streams instead.

use std::io::Read;
use std::time::Duration;

use url::Url;

use crate::NetError;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// User agent string
    pub user_agent: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: "lumen/0.1".into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = ua.to_string();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// An open body stream for one fetched resource.
///
/// `content_length` is the server-declared body size, if any. When it is
/// absent the reader is terminated by end-of-data and the caller must
/// grow its buffer as it reads.
pub struct FetchStream {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl FetchStream {
    pub fn new(content_length: Option<u64>, reader: Box<dyn Read + Send>) -> Self {
        Self {
            content_length,
            reader,
        }
    }
}

/// Opens remote resources for blocking reads.
pub trait Transport: Send + Sync {
    /// Open `url` and return its body stream.
    ///
    /// A non-success HTTP status is an error; the pipeline never decodes
    /// error pages.
    fn open(&self, url: &Url) -> Result<FetchStream, NetError>;
}

/// HTTP transport over a shared blocking client.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport with default settings.
    pub fn new() -> Result<Self, NetError> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with custom config.
    pub fn with_config(config: TransportConfig) -> Result<Self, NetError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NetError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &Url) -> Result<FetchStream, NetError> {
        tracing::debug!("HTTP GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| NetError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("HTTP GET {} failed with status {}", url, status);
            return Err(NetError::HttpError {
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        Ok(FetchStream::new(content_length, Box::new(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_config_builder() {
        let config = TransportConfig::new()
            .user_agent("test/1.0")
            .connect_timeout(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(10));

        assert_eq!(config.user_agent, "test/1.0");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.user_agent, "lumen/0.1");
    }

    #[test]
    fn test_fetch_stream_declared_length() {
        let body = b"hello".to_vec();
        let mut stream = FetchStream::new(Some(5), Box::new(Cursor::new(body)));

        assert_eq!(stream.content_length, Some(5));

        let mut out = Vec::new();
        stream.reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_fetch_stream_unknown_length() {
        let stream = FetchStream::new(None, Box::new(Cursor::new(Vec::new())));
        assert!(stream.content_length.is_none());
    }
}
