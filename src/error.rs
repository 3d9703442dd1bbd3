use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("port `{0}` is invalid")]
    InvalidPort(String),
    #[error("port range `{0}` is invalid (expected `PORT` or `START-END`)")]
    InvalidPortRange(String),
    #[error("failed to check target kind (ensure it's a domain or IPv4)")]
    HostParseFailed(#[source] url::ParseError),
    #[error("failed to resolve the given target: {0}")]
    ResolverFailed(#[source] std::io::Error),
    #[error("resolver didn't find any IPv4 address mapped by `{0}`")]
    DomainLookupFailed(String),
    #[error("only supports IPv4 addresses or domains that map addresses with this IP version")]
    OnlyIpv4TargetSupported,
    #[error("at least one concurrent probe must be allowed")]
    ZeroConcurrency,
    #[error("failed to build the HTTP client: {0}")]
    ClientBuildFailed(#[source] reqwest::Error),
    #[error("failed to build the probe worker pool: {0}")]
    WorkerPoolFailed(#[source] rayon::ThreadPoolBuildError),
}
