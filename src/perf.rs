//! Lightweight performance instrumentation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub struct Scope {
    name: &'static str,
    detail: String,
    start: Instant,
}

impl Scope {
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }
        tracing::info!(
            target: "pumlgen::perf",
            "{} {}: {:.2} ms",
            self.name,
            self.detail,
            self.elapsed_ms()
        );
    }
}

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Start a timed scope; the elapsed time is logged when it drops.
pub fn scope(name: &'static str, detail: impl Into<String>) -> Scope {
    Scope {
        name,
        detail: detail.into(),
        start: Instant::now(),
    }
}
