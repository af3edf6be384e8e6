//! Shared helpers for the behavioral test suite.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

/// Shared append-only record of observed side effects.
pub type Recorder = Arc<Mutex<Vec<String>>>;

pub fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(log: &Recorder, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

pub fn recorded(log: &Recorder) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// In-memory sink for tracing output, so tests can assert on diagnostics.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install a thread-local subscriber writing into a [`LogCapture`]. Keep the
/// guard alive for the duration of the test.
pub fn captured() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
