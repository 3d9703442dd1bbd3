use std::{
    fmt::{self, Display},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs},
    ops::RangeInclusive,
    str::FromStr,
    time::Duration,
};

use url::Host;

use crate::error::ScanError;

use super::probe::DEFAULT_MARKERS;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_PORTS: PortRange = PortRange::new(8000, 9000);

/// Host being probed and how long a single probe may take.
///
/// Only built through [`Target::resolve`], so the address probes go to is
/// always an IPv4 known before the scan starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    ip: Ipv4Addr,
    timeout: Duration,
}

impl Target {
    /// Accepts an IPv4 literal or a domain name, which is resolved once here
    /// to its first IPv4 address. IPv6, bracketed or not, is refused.
    pub fn resolve(host: &str, timeout: Duration) -> Result<Self, ScanError> {
        let host = host.trim();
        if host.parse::<Ipv6Addr>().is_ok() {
            return Err(ScanError::OnlyIpv4TargetSupported);
        }

        let ip = match Host::parse(host).map_err(ScanError::HostParseFailed)? {
            Host::Ipv4(ip) => ip,
            Host::Ipv6(_) => return Err(ScanError::OnlyIpv4TargetSupported),
            Host::Domain(name) => first_ipv4(&name)?,
        };

        Ok(Self {
            host: host.into(),
            ip,
            timeout,
        })
    }

    /// Name the target was given as.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn first_ipv4(name: &str) -> Result<Ipv4Addr, ScanError> {
    let ip = (name, 0)
        .to_socket_addrs()
        .map_err(ScanError::ResolverFailed)?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ScanError::DomainLookupFailed(name.into()))?;

    log::debug!("Resolved `{}` to {}", name, ip);

    Ok(ip)
}

/// Inclusive port bounds. `start > end` is allowed and simply holds no port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        DEFAULT_PORTS
    }
}

impl Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn parse_port(raw: &str) -> Result<u16, ScanError> {
    match raw.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ScanError::InvalidPort(raw.trim().into())),
    }
}

impl FromStr for PortRange {
    type Err = ScanError;

    /// Accepts `PORT` or `START-END`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut bounds = raw.split('-');
        let range = match (bounds.next(), bounds.next(), bounds.next()) {
            (Some(single), None, None) => {
                let port = parse_port(single)?;
                PortRange::new(port, port)
            }
            (Some(start), Some(end), None) => PortRange::new(parse_port(start)?, parse_port(end)?),
            _ => return Err(ScanError::InvalidPortRange(raw.into())),
        };

        Ok(range)
    }
}

/// Knobs of a scan that are independent from the target.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum number of probes in flight at once.
    pub concurrency: usize,
    /// Scan-wide limit; requests still running are cut off when it expires.
    pub deadline: Option<Duration>,
    /// Error substrings that reveal a listener behind a failed exchange.
    pub markers: Vec<String>,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.concurrency == 0 {
            return Err(ScanError::ZeroConcurrency);
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}
