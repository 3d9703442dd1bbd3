use std::{
    io::{self, Write},
    time::Duration,
};

use pad::PadStr;
use parking_lot::Mutex;

use crate::scan::OpenPorts;

/// Where scan progress and results are shown. The scanner only talks to this
/// trait, so a terminal, a log or a test double can sit behind it.
pub trait Progress {
    fn set_status(&self, text: &str);
    fn append_result(&self, port: u16);
}

/// Prints progress one line per event, on stdout unless told otherwise.
#[derive(Debug)]
pub struct ConsoleProgress<W: Write = io::Stdout> {
    out: Mutex<W>,
}

impl ConsoleProgress {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

// Write failures are dropped: losing a progress line must not fail the scan.
impl<W: Write> Progress for ConsoleProgress<W> {
    fn set_status(&self, text: &str) {
        let _ = writeln!(self.out.lock(), "{}", text);
    }

    fn append_result(&self, port: u16) {
        let _ = writeln!(
            self.out.lock(),
            "  {}open",
            port.to_string().pad_to_width(8)
        );
    }
}

/// Final summary printed once the scan is over.
pub fn summary(out: &mut impl Write, elapsed: Duration, open: &OpenPorts) -> io::Result<()> {
    writeln!(out, "\nScan Duration: {:.4}s", elapsed.as_secs_f32())?;
    if open.is_empty() {
        writeln!(out, "Didn't find any open port.")
    } else {
        writeln!(out, "Found {} open port(s).", open.len())
    }
}
