use std::{
    io,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{
    arg, crate_authors, crate_name, crate_version, value_parser, ArgAction, ArgMatches, Command,
};
use hscan::{
    error::ScanError,
    logger,
    report::{self, ConsoleProgress},
    scan::{
        PortRange, ScanConfig, Scanner, Target, DEFAULT_CONCURRENCY, DEFAULT_MARKERS,
        DEFAULT_PORTS, DEFAULT_TIMEOUT, MAX_WORKERS,
    },
};

struct ParsedArgs {
    debug: bool,
    target: String,
    ports: PortRange,
    timeout: Duration,
    config: ScanConfig,
}

fn parse_args(matches: ArgMatches) -> Result<ParsedArgs, ScanError> {
    let debug = matches.get_flag("debug");

    let ports = match matches.get_one::<String>("ports") {
        Some(raw) => raw.parse::<PortRange>()?,
        None => DEFAULT_PORTS,
    };

    let timeout = matches
        .get_one::<u64>("timeout")
        .map_or(DEFAULT_TIMEOUT, |ms| Duration::from_millis(*ms));

    let concurrency = matches
        .get_one::<usize>("concurrency")
        .copied()
        .unwrap_or(DEFAULT_CONCURRENCY);

    let deadline = matches
        .get_one::<u64>("deadline")
        .map(|secs| Duration::from_secs(*secs));

    let markers = DEFAULT_MARKERS
        .iter()
        .map(|m| m.to_string())
        .chain(matches.get_many::<String>("marker").into_iter().flatten().cloned())
        .collect();

    let target = matches.get_one::<String>("target").unwrap().to_owned();

    let config = ScanConfig {
        concurrency,
        deadline,
        markers,
    };
    config.validate()?;

    Ok(ParsedArgs {
        debug,
        target,
        ports,
        timeout,
        config,
    })
}

fn main() -> Result<()> {
    let arg_matches = Command::new(crate_name!())
        .about(
            "TCP port scanner that only needs to send HTTP requests.\n\
            Ports are guessed open when they answer or fail like a non-HTTP service.",
        )
        .version(crate_version!())
        .author(crate_authors!())
        .args([
            // Miscellaneous arguments.
            arg!(-d --debug "Turns on debugging information").action(ArgAction::SetTrue),
            arg!([target] "Address or hostname to scan").default_value("127.0.0.1"),
        ])
        .args([
            // Scan settings.
            arg!(-p --ports <RANGE>).help(format!(
                "Port or inclusive range of ports [default: {}]",
                DEFAULT_PORTS
            )),
            arg!(-c --concurrency <N>)
                .help(format!(
                    "Maximum number of probes in flight, served by at most {} threads \
                    [default: {}]",
                    MAX_WORKERS, DEFAULT_CONCURRENCY
                ))
                .value_parser(value_parser!(usize)),
            arg!(-t --timeout <MS>)
                .help(format!(
                    "Timeout of each probe in milliseconds [default: {}]",
                    DEFAULT_TIMEOUT.as_millis()
                ))
                .value_parser(value_parser!(u64)),
            arg!(-m --marker <TEXT> "Extra error text that marks a port as open")
                .value_delimiter(',')
                .action(ArgAction::Append),
            arg!(--deadline <SECS> "Stop the whole scan after this many seconds")
                .value_parser(value_parser!(u64)),
        ])
        .get_matches();

    // Extract arguments.
    let parsed = parse_args(arg_matches)?;

    // Warnings are always shown, debug adds per-probe lines.
    logger::init(parsed.debug);

    // Resolve target.
    let target = Target::resolve(&parsed.target, parsed.timeout)?;

    // Start scanner.
    let scanner = Scanner::new(target, parsed.config)?;
    let now = Instant::now();
    let open = scanner.scan_with(parsed.ports, &ConsoleProgress::stdout());
    let elapsed = now.elapsed();

    // Show summary.
    report::summary(&mut io::stdout().lock(), elapsed, &open)?;

    Ok(())
}
