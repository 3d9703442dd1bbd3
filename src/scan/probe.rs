use std::{sync::Arc, time::Duration};

use url::Url;

use super::{
    config::Target,
    transport::{Transport, TransportError},
    PortState,
};

/// Error fragments that show up when a listener answered with something other
/// than plain HTTP (TLS, a binary protocol) or accepted the connection and
/// stalled. Their wording depends on the network stack, so this list is only
/// the starting point and can be replaced per scan.
pub const DEFAULT_MARKERS: [&str; 5] = [
    "exceeded while awaiting",
    "ssl",
    "cors",
    "invalid",
    "protocol",
];

/// Decides whether a failed exchange still proves a listener exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    markers: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    #[inline]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn classify(&self, error: &TransportError) -> PortState {
        let text = error.message().to_lowercase();
        if self.markers.iter().any(|m| text.contains(m.as_str())) {
            PortState::Open
        } else {
            PortState::Closed
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS)
    }
}

/// Sends a single best-effort request to `ip:port` of a [`Target`].
///
/// Any HTTP response, whatever its status, means the port is open. Failures
/// go through the [`Classifier`]; nothing is reported back as an error.
#[derive(Debug, Clone)]
pub struct Probe {
    host: String,
    timeout: Duration,
    transport: Arc<dyn Transport>,
    classifier: Classifier,
}

impl Probe {
    pub fn new(target: &Target, transport: Arc<dyn Transport>, classifier: Classifier) -> Self {
        Self {
            host: target.ip().to_string(),
            timeout: target.timeout(),
            transport,
            classifier,
        }
    }

    fn url(&self, port: u16) -> Option<Url> {
        Url::parse(&format!("http://{}:{}/", self.host, port)).ok()
    }

    fn run(&self, port: u16, budget: Duration) -> PortState {
        let Some(url) = self.url(port) else {
            log::debug!("Port {}: can't build a request for host `{}`", port, self.host);
            return PortState::Closed;
        };

        match self.transport.fetch(&url, budget.min(self.timeout)) {
            Ok(resp) => {
                log::debug!("Port {}: answered with HTTP {}", port, resp.status);
                PortState::Open
            }
            Err(e) => {
                let state = self.classifier.classify(&e);
                log::debug!("Port {}: {} ({})", port, state, e);
                state
            }
        }
    }

    /// `true` when the port was classified open.
    #[inline]
    pub fn probe(&self, port: u16) -> bool {
        self.probe_within(port, self.timeout)
    }

    /// Like [`Probe::probe`], but the request gives up after `budget` if
    /// that is shorter than the target's timeout.
    #[inline]
    pub fn probe_within(&self, port: u16, budget: Duration) -> bool {
        self.run(port, budget) == PortState::Open
    }
}
