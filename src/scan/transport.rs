use std::{
    error::Error,
    fmt::{self, Debug, Display},
    io,
    time::Duration,
};

use reqwest::{blocking::Client, redirect::Policy};
use url::Url;

use crate::error::ScanError;

/// What is left of a successful exchange once the body is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
}

/// A failed exchange, reduced to the text the classifier inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for TransportError {}

/// Performs one GET and releases the connection before returning.
///
/// The exchange must give up once `budget` has elapsed. It is never longer
/// than the target's timeout and shrinks as a scan deadline gets closer.
pub trait Transport: Debug + Send + Sync {
    fn fetch(&self, url: &Url, budget: Duration) -> Result<Response, TransportError>;
}

/// Blocking HTTP transport used against real hosts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a client bounded by `timeout` per request. Certificates are not
    /// verified, redirects are not followed and proxies are ignored: only the
    /// first hop to the probed port is of interest.
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .map_err(ScanError::ClientBuildFailed)?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &Url, budget: Duration) -> Result<Response, TransportError> {
        let mut resp = self
            .client
            .get(url.clone())
            .timeout(budget)
            .send()
            .map_err(|e| TransportError::new(describe(e)))?;

        let status = resp.status().as_u16();

        // Body content is irrelevant, reading it just lets the connection go.
        let _ = io::copy(&mut resp, &mut io::sink());

        Ok(Response { status })
    }
}

/// Flattens a reqwest error and its causes into one line. The URL is left
/// out so that the host name can't match a marker by accident.
fn describe(err: reqwest::Error) -> String {
    let err = err.without_url();
    let answered_then_stalled = err.is_timeout() && !err.is_connect();

    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    if answered_then_stalled {
        // The listener accepted the connection but never produced a response.
        text.insert_str(0, "timeout exceeded while awaiting response: ");
    }

    text
}
