use std::{
    collections::BTreeSet,
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{error::ScanError, report::Progress};

pub use self::{
    config::{PortRange, ScanConfig, Target, DEFAULT_CONCURRENCY, DEFAULT_PORTS, DEFAULT_TIMEOUT},
    limiter::{Limiter, Permit},
    probe::{Classifier, Probe, DEFAULT_MARKERS},
    transport::{HttpTransport, Response, Transport, TransportError},
};

mod config;
mod limiter;
mod probe;
mod transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
}

impl Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PortState::Open => "open",
                PortState::Closed => "closed",
            }
        )
    }
}

/// Distinct ports found open, iterated in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenPorts(BTreeSet<u16>);

impl OpenPorts {
    #[inline]
    pub fn contains(&self, port: u16) -> bool {
        self.0.contains(&port)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for OpenPorts {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OpenPorts {
    type Item = u16;
    type IntoIter = std::iter::Copied<std::collections::btree_set::Iter<'a, u16>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

/// Upper bound on probe worker threads. Permits above it still count
/// against the limiter but queue for a free worker.
pub const MAX_WORKERS: usize = 256;

#[inline]
fn expired(cutoff: Option<Instant>) -> bool {
    cutoff.is_some_and(|at| Instant::now() >= at)
}

/// Probes every port of a range against one target, with at most
/// `concurrency` probes in flight.
pub struct Scanner {
    target: Target,
    probe: Probe,
    limiter: Limiter,
    pool: ThreadPool,
    deadline: Option<Duration>,
}

impl Scanner {
    pub fn new(target: Target, config: ScanConfig) -> Result<Self, ScanError> {
        let transport = HttpTransport::new(target.timeout())?;
        Self::with_transport(target, config, Arc::new(transport))
    }

    /// Same as [`Scanner::new`] but probes go through `transport`.
    pub fn with_transport(
        target: Target,
        config: ScanConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ScanError> {
        config.validate()?;

        let workers = config.concurrency.min(MAX_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("probe-{}", i))
            .build()
            .map_err(ScanError::WorkerPoolFailed)?;

        let classifier = Classifier::new(&config.markers);
        log::debug!(
            "Probing `{}` ({}) with {} worker(s), open markers: {:?}",
            target.host(),
            target.ip(),
            workers,
            classifier.markers()
        );
        let probe = Probe::new(&target, transport, classifier);

        Ok(Self {
            target,
            probe,
            limiter: Limiter::new(config.concurrency),
            pool,
            deadline: config.deadline,
        })
    }

    #[inline]
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    fn probe_unit(&self, port: u16, cutoff: Option<Instant>) -> PortState {
        let attempt = || match cutoff {
            Some(at) => self
                .probe
                .probe_within(port, at.saturating_duration_since(Instant::now())),
            None => self.probe.probe(port),
        };

        match panic::catch_unwind(AssertUnwindSafe(attempt)) {
            Ok(true) => PortState::Open,
            Ok(false) => PortState::Closed,
            Err(_) => {
                log::warn!("Probe of port {} panicked, counting it as closed", port);
                PortState::Closed
            }
        }
    }

    /// Probes each port of `range` once and returns those classified open.
    ///
    /// Blocks until every dispatched probe has released its slot. An empty
    /// range dispatches nothing. With a deadline, no probe is dispatched
    /// after it expires, in-flight requests are cut off when it does and
    /// their outcome is left out.
    pub fn scan(&self, range: PortRange) -> OpenPorts {
        let open = Mutex::new(BTreeSet::new());
        let started = Instant::now();
        let cutoff = self.deadline.map(|d| started + d);

        log::debug!(
            "Scanning {} port(s) {} of `{}` ({} at a time, {}ms per probe)",
            range.len(),
            range,
            self.target.host(),
            self.limiter.max(),
            self.target.timeout().as_millis()
        );

        self.pool.in_place_scope(|s| {
            for port in range.ports() {
                let permit = self.limiter.acquire();
                if expired(cutoff) {
                    log::warn!("Scan deadline expired before probing port {}", port);
                    break;
                }

                let open = &open;
                s.spawn(move |_| {
                    let _permit = permit;

                    let state = self.probe_unit(port, cutoff);
                    if state == PortState::Open {
                        if expired(cutoff) {
                            log::debug!("Port {}: answered after the deadline, ignored", port);
                        } else {
                            open.lock().insert(port);
                        }
                    }
                });
            }
        });

        self.limiter.wait();

        let open = OpenPorts(open.into_inner());
        log::debug!(
            "Scan finished in {:.4}s with {} open port(s)",
            started.elapsed().as_secs_f32(),
            open.len()
        );

        open
    }

    /// Runs [`Scanner::scan`] while keeping `progress` informed.
    pub fn scan_with(&self, range: PortRange, progress: &dyn Progress) -> OpenPorts {
        progress.set_status("Scanning...");

        let open = self.scan(range);

        progress.set_status("Open Ports:");
        open.iter().for_each(|port| progress.append_result(port));

        open
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use url::Url;

    use super::*;

    type Reply = fn(u16) -> Result<Response, TransportError>;

    #[derive(Debug)]
    struct Fake {
        reply: Reply,
        delay: Duration,
        running: AtomicUsize,
        most_running: AtomicUsize,
        calls: Mutex<HashMap<u16, usize>>,
        budgets: Mutex<Vec<Duration>>,
    }

    impl Fake {
        fn new(reply: Reply) -> Arc<Self> {
            Self::slow(reply, Duration::ZERO)
        }

        fn slow(reply: Reply, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay,
                running: AtomicUsize::new(0),
                most_running: AtomicUsize::new(0),
                calls: Mutex::new(HashMap::new()),
                budgets: Mutex::new(Vec::new()),
            })
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().values().sum()
        }
    }

    impl Transport for Fake {
        fn fetch(&self, url: &Url, budget: Duration) -> Result<Response, TransportError> {
            let port = url.port_or_known_default().unwrap();
            *self.calls.lock().entry(port).or_default() += 1;
            self.budgets.lock().push(budget);

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.most_running.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);

            (self.reply)(port)
        }
    }

    fn local() -> Target {
        Target::resolve("127.0.0.1", DEFAULT_TIMEOUT).unwrap()
    }

    fn scanner(transport: Arc<Fake>, concurrency: usize) -> Scanner {
        let config = ScanConfig {
            concurrency,
            ..Default::default()
        };
        Scanner::with_transport(
            local(),
            config,
            transport,
        )
        .unwrap()
    }

    fn mixed(port: u16) -> Result<Response, TransportError> {
        match port {
            8080 => Ok(Response { status: 404 }),
            8081 => Err(TransportError::new("net/http: CORS request blocked")),
            8082 => Err(TransportError::new("connection refused")),
            8083 => Ok(Response { status: 500 }),
            _ => Err(TransportError::new("connection refused")),
        }
    }

    fn all_open(_: u16) -> Result<Response, TransportError> {
        Ok(Response { status: 200 })
    }

    #[test]
    fn classifies_responses_and_errors() {
        let fake = Fake::new(mixed);
        let open = scanner(fake, 10).scan(PortRange::new(8000, 9000));

        assert_eq!(open.iter().collect::<Vec<_>>(), vec![8080, 8081, 8083]);
        assert!(open.contains(8080));
        assert!(open.contains(8081));
        assert!(!open.contains(8082));
    }

    #[test]
    fn reversed_range_probes_nothing() {
        let fake = Fake::new(all_open);
        let open = scanner(fake.clone(), 4).scan(PortRange::new(9000, 8000));

        assert!(open.is_empty());
        assert_eq!(fake.total_calls(), 0);
    }

    #[test]
    fn every_port_is_probed_exactly_once() {
        let fake = Fake::new(all_open);
        let open = scanner(fake.clone(), 16).scan(PortRange::new(1000, 1499));

        assert_eq!(open.len(), 500);
        assert_eq!(open.iter().next(), Some(1000));
        assert_eq!(open.iter().last(), Some(1499));

        let calls = fake.calls.lock();
        assert_eq!(calls.len(), 500);
        assert!(calls.values().all(|&n| n == 1));
    }

    #[test]
    fn concurrency_never_exceeds_the_limit() {
        let fake = Fake::slow(all_open, Duration::from_millis(5));
        let scanner = scanner(fake.clone(), 8);

        scanner.scan(PortRange::new(1, 200));

        assert!(fake.most_running.load(Ordering::SeqCst) <= 8);
        assert!(scanner.limiter().peak() <= 8);
        assert!(scanner.limiter().peak() > 1);
    }

    #[test]
    fn no_slot_is_held_after_scan_returns() {
        let fake = Fake::slow(all_open, Duration::from_millis(2));
        let scanner = scanner(fake, 32);

        scanner.scan(PortRange::new(1, 300));

        assert_eq!(scanner.limiter().in_flight(), 0);
    }

    #[test]
    fn repeated_scans_agree() {
        let scanner = scanner(Fake::new(mixed), 50);

        let first = scanner.scan(PortRange::new(8000, 8100));
        let second = scanner.scan(PortRange::new(8000, 8100));

        assert_eq!(first, second);
    }

    #[test]
    fn panicking_probe_counts_as_closed() {
        fn explode(port: u16) -> Result<Response, TransportError> {
            if port == 13 {
                panic!("transport bug");
            }
            Ok(Response { status: 200 })
        }

        let scanner = scanner(Fake::new(explode), 4);
        let open = scanner.scan(PortRange::new(10, 20));

        assert_eq!(open.len(), 10);
        assert!(!open.contains(13));
        assert_eq!(scanner.limiter().in_flight(), 0);
    }

    #[test]
    fn deadline_stops_dispatch_and_drops_late_results() {
        let fake = Fake::slow(all_open, Duration::from_millis(50));
        let config = ScanConfig {
            concurrency: 1,
            deadline: Some(Duration::from_millis(120)),
            ..Default::default()
        };
        let scanner = Scanner::with_transport(
            local(),
            config,
            fake.clone(),
        )
        .unwrap();

        let open = scanner.scan(PortRange::new(1, 100));

        assert!(fake.total_calls() < 100);
        assert!(open.len() < fake.total_calls());
        assert!(open.iter().all(|p| (1..=100).contains(&p)));
        assert_eq!(scanner.limiter().in_flight(), 0);
    }

    #[test]
    fn custom_markers_drive_classification() {
        fn reset(_: u16) -> Result<Response, TransportError> {
            Err(TransportError::new("connection reset by peer"))
        }

        let config = ScanConfig {
            concurrency: 2,
            markers: vec!["reset by peer".into()],
            ..Default::default()
        };
        let scanner = Scanner::with_transport(
            local(),
            config,
            Fake::new(reset),
        )
        .unwrap();

        assert_eq!(scanner.scan(PortRange::new(7, 9)).len(), 3);
    }

    #[test]
    fn zero_concurrency_fails_construction() {
        let config = ScanConfig {
            concurrency: 0,
            ..Default::default()
        };
        let res = Scanner::with_transport(
            local(),
            config,
            Fake::new(all_open),
        );

        assert!(matches!(res, Err(ScanError::ZeroConcurrency)));
    }

    #[test]
    fn probes_get_the_full_timeout_without_deadline() {
        let fake = Fake::new(all_open);
        scanner(fake.clone(), 4).scan(PortRange::new(1, 20));

        assert!(fake.budgets.lock().iter().all(|&b| b == DEFAULT_TIMEOUT));
    }

    #[test]
    fn deadline_shortens_request_budgets() {
        let fake = Fake::slow(all_open, Duration::from_millis(30));
        let config = ScanConfig {
            concurrency: 4,
            deadline: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let scanner = Scanner::with_transport(local(), config, fake.clone()).unwrap();

        scanner.scan(PortRange::new(1, 50));

        let budgets = fake.budgets.lock();
        assert!(!budgets.is_empty());
        assert!(budgets.iter().all(|&b| b <= Duration::from_millis(100)));
    }

    #[test]
    fn worker_threads_are_capped() {
        let config = ScanConfig {
            concurrency: 10_000,
            ..Default::default()
        };
        let scanner = Scanner::with_transport(local(), config, Fake::new(all_open)).unwrap();

        assert_eq!(scanner.pool.current_num_threads(), MAX_WORKERS);
        assert_eq!(scanner.limiter().max(), 10_000);
        assert_eq!(scanner.scan(PortRange::new(1, 600)).len(), 600);
        assert_eq!(scanner.limiter().in_flight(), 0);
    }
}
