//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (from `RUST_LOG`
//! when set) in front of a pretty or JSON formatting layer.
//!
//! Log lines go to stderr. Stdout carries only what `init` and `version`
//! print for the operator.

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Directives for `run` when `RUST_LOG` is unset.
pub const RUN_DIRECTIVES: &str = "microchain_node=info,microchain_protocol=info,tower_http=info";

/// Directives for `init` when `RUST_LOG` is unset.
pub const INIT_DIRECTIVES: &str = "microchain_node=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// `"json"` (any case) selects JSON; anything else is pretty.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `default_directives` when it is set and parses.
/// Fails if a subscriber is already installed.
pub fn init_logging(default_directives: &str, format: LogFormat) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directives)?)
        .with(output_layer(format, std::io::stderr))
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(?format, "logging initialized");
    Ok(())
}

fn env_filter(default_directives: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives)
            .with_context(|| format!("invalid log directives {:?}", default_directives)),
    }
}

/// The formatting layer for `format`, writing through `writer`.
fn output_layer<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn unknown_formats_fall_back_to_pretty() {
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(RUN_DIRECTIVES).is_ok());
        assert!(EnvFilter::try_new(INIT_DIRECTIVES).is_ok());
    }

    #[test]
    fn json_layer_writes_one_object_per_event() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(output_layer(LogFormat::Json, move || sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(peer = "127.0.0.1:3000", "peer joined");
            tracing::debug!("below the filter");
        });

        let text = captured.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["fields"]["message"], "peer joined");
        assert_eq!(event["fields"]["peer"], "127.0.0.1:3000");
    }

    #[test]
    fn pretty_layer_writes_to_the_given_writer() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(output_layer(LogFormat::Pretty, move || sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("pool gossip failed");
        });

        assert!(captured.text().contains("pool gossip failed"));
    }
}
