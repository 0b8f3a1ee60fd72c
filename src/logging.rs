// Logging setup for binaries: console output, optional JSON file output, and span timing
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use tracing::field::{Field, Visit};
use tracing::{Id, Subscriber, debug, span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Context, Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const CRATE_TARGET: &str = "quantum_engine";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Called once from a binary's `main`.
///
/// `CONSOLE_LOG_LEVEL` / `FILE_LOG_LEVEL` set the level for this crate (other crates stay at `warn`).
/// `LOG_TO_FILE=true` adds a JSON file layer under `LOG_DIR` (default `logs`).
pub fn init_logging(app_name: &str) -> Result<()> {
    let console_level = env::var("CONSOLE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let file_level = env::var("FILE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_to_file = env::var("LOG_TO_FILE").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);

    let console_layer = fmt::Layer::new().pretty().with_filter(crate_filter(&console_level));

    if log_to_file {
        let log_dir = PathBuf::from(env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()));
        fs::create_dir_all(&log_dir)
            .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let file_name = format!("{}_{}.log", app_name, chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        let (non_blocking, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, file_name));
        FILE_GUARD.set(guard).ok();

        let file_layer = fmt::Layer::new()
            .json()
            .with_writer(non_blocking)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(crate_filter(&file_level));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .with(SpanTimingLayer)
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(console_layer)
            .with(SpanTimingLayer)
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    debug!(app = app_name, log_to_file, "Logging initialised");
    Ok(())
}

fn crate_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("warn,{}={}", CRATE_TARGET, level))
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}=info", CRATE_TARGET)))
}

/// Reports busy/idle/total time for spans created with `timed = true`.
struct SpanTimingLayer;

struct SpanTimings {
    created: Instant,
    last_transition: Instant,
    busy: Duration,
    idle: Duration,
}

#[derive(Default)]
struct TimedFieldVisitor {
    timed: bool,
}

impl Visit for TimedFieldVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "timed" {
            self.timed = value;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S> Layer<S> for SpanTimingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = TimedFieldVisitor::default();
        attrs.record(&mut visitor);
        if !visitor.timed {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let now = Instant::now();
            span.extensions_mut().insert(SpanTimings {
                created: now,
                last_transition: now,
                busy: Duration::ZERO,
                idle: Duration::ZERO,
            });
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(timings) = span.extensions_mut().get_mut::<SpanTimings>() {
                let now = Instant::now();
                timings.idle += now - timings.last_transition;
                timings.last_transition = now;
            }
        }
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(timings) = span.extensions_mut().get_mut::<SpanTimings>() {
                let now = Instant::now();
                timings.busy += now - timings.last_transition;
                timings.last_transition = now;
            }
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(&id) {
            if let Some(timings) = span.extensions_mut().remove::<SpanTimings>() {
                debug!(
                    span = span.name(),
                    busy_time = ?timings.busy,
                    idle_time = ?timings.idle,
                    total_time = ?timings.created.elapsed(),
                    "span closed"
                );
            }
        }
    }
}
