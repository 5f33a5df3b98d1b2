//! Shared helpers for unit tests.

use crate::core::error::ProviderError;
use crate::orchestrator::Provider;
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return its result together with
/// everything logged at `WARN` or above.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&capture.0.lock().unwrap()).into_owned();
    (out, logs)
}

/// Write `value` as pretty JSON at `dir/name`, creating parent directories.
pub fn write_json(dir: &Path, name: &str, value: &Value) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Ordered record of provider lifecycle events, shared between fakes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position_opt(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn position(&self, event: &str) -> usize {
        self.position_opt(event)
            .unwrap_or_else(|| panic!("event {event} not logged in {:?}", self.events()))
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Scriptable provider that records `start:`, `healthy:` and `stop:` events.
pub struct FakeProvider {
    name: String,
    log: EventLog,
    start_delay: Duration,
    start_error: Option<String>,
    stop_error: Option<String>,
    healthy: bool,
    started: AtomicBool,
    reported: AtomicBool,
    cancel: Option<CancellationToken>,
}

impl FakeProvider {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            start_delay: Duration::ZERO,
            start_error: None,
            stop_error: None,
            healthy: true,
            started: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            cancel: None,
        }
    }

    /// `start()` takes this long before returning.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn fail_start(mut self, reason: &str) -> Self {
        self.start_error = Some(reason.to_string());
        self
    }

    pub fn fail_stop(mut self, reason: &str) -> Self {
        self.stop_error = Some(reason.to_string());
        self
    }

    pub fn never_healthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Cancel `token` from inside `start()`.
    pub fn cancel_on_start(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.log.push(format!("start:{}", self.name));
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        if let Some(reason) = &self.start_error {
            return Err(ProviderError::start(reason.clone()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.log.push(format!("stop:{}", self.name));
        self.started.store(false, Ordering::SeqCst);
        match &self.stop_error {
            Some(reason) => Err(ProviderError::stop(reason.clone())),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> bool {
        let ready = self.healthy && self.started.load(Ordering::SeqCst);
        if ready && !self.reported.swap(true, Ordering::SeqCst) {
            self.log.push(format!("healthy:{}", self.name));
        }
        ready
    }
}
