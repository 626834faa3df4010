//! Injected logging capability.
//!
//! Components that log take `&dyn Logger` explicitly instead of reaching
//! for global state, so tests can substitute [`NoopLogger`] and the merge
//! engine's dependency on observability stays visible in its signature.

/// Minimal logging surface: informational progress and warnings.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// Logger that prints to stdout/stderr.
pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn info(&self, msg: &str) {
        println!("INFO  {msg}");
    }

    fn warn(&self, msg: &str) {
        eprintln!("WARN  {msg}");
    }
}

/// Logger that discards everything.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
}
