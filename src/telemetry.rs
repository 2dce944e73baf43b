// src/telemetry.rs
//! Tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "NEWSFLOW_LOG_JSON";

/// Subsystem targets used by `tracing` calls across the crate.
pub const LOG_TARGETS: &[&str] = &[
    "newsflow",
    "scheduler",
    "registry",
    "crawl",
    "lifecycle",
    "review",
    "publish",
];

/// `info` for every subsystem target, `warn` for everything else.
pub fn default_filter() -> String {
    let mut directives: Vec<String> = LOG_TARGETS.iter().map(|t| format!("{t}=info")).collect();
    directives.push("warn".to_string());
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter and
/// `NEWSFLOW_LOG_JSON=1` switches to JSON lines. Safe to call more than once.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));
    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_filter_keeps_subsystem_info_events() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(default_filter()))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "scheduler", "tick seen");
            tracing::info!(target: "lifecycle", "published seen");
            tracing::info!(target: "crawl", "pass seen");
            tracing::info!(target: "hyper", "dependency noise");
            tracing::warn!(target: "hyper", "dependency warning");
        });
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        for line in ["tick seen", "published seen", "pass seen", "dependency warning"] {
            assert!(text.contains(line), "missing {line:?} in:\n{text}");
        }
        assert!(!text.contains("dependency noise"));
    }
}
