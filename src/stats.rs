//! Per-tick scheduling statistics and their export surface.
//!
//! The rebalance controller snapshots every server's observed rates once per
//! tick. Snapshots decouple recording from consumption: callers can assert
//! on them in tests, feed them to monitoring, or write them out in the
//! classic space-separated statistics line.

use std::io::Write;
use std::sync::Mutex;

/// One server's statistics as observed by a controller tick.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ServerTickStats {
    pub hitrate: f64,
    pub nhitrate: f64,
    pub usagerate: f64,
    /// `alpha * (1 - nhitrate) + beta * usagerate` at tick time.
    pub cost: f64,
    /// Arc length owned on the ring during the tick window.
    pub hashsize: u64,
    pub set: u32,
    pub get: u32,
}

/// Publishes tick snapshots to a monitoring sink.
pub trait TickExporter {
    fn export(&self, tick: u32, servers: &[ServerTickStats]);
}

/// Writes the classic one-line-per-tick format: the tick number followed by
/// `hitrate nhitrate usagerate cost hashsize set get` per server.
#[derive(Debug)]
pub struct TextLineExporter<W: Write + Send + Sync> {
    writer: Mutex<W>,
}

impl<W: Write + Send + Sync> TextLineExporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .expect("stats exporter writer poisoned")
    }
}

impl<W: Write + Send + Sync> TickExporter for TextLineExporter<W> {
    fn export(&self, tick: u32, servers: &[ServerTickStats]) {
        let mut writer = self.writer.lock().expect("stats exporter writer poisoned");
        let _ = write!(writer, "{} ", tick);
        for server in servers {
            let _ = write!(
                writer,
                "{:.6} {:.6} {:.6} {:.6} {} {} {} ",
                server.hitrate,
                server.nhitrate,
                server.usagerate,
                server.cost,
                server.hashsize,
                server.set,
                server.get
            );
        }
        let _ = writeln!(writer);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
