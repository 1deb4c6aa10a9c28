//! The ambient logging seam. There is no `tracing`/`log` dependency
//! anywhere in this workspace — every crate reports through this trait,
//! threaded through as `&mut dyn Reporter`.

/// Structured-enough process reporting without a logging facade.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// The worker host's concrete `Reporter`: formats each line and writes it
/// to stderr, prefixed by level. Each cooperative task owns its own
/// instance — there is no shared mutable report state to synchronize.
#[derive(Debug, Default)]
pub struct EprintlnReporter {
    prefix: Option<String>,
}

impl EprintlnReporter {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// A reporter that prefixes every line, e.g. with the queue name a
    /// worker task is consuming from.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn format(&self, msg: &str) -> String {
        match &self.prefix {
            Some(p) => format!("[{p}] {msg}"),
            None => msg.to_string(),
        }
    }
}

impl Reporter for EprintlnReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {}", self.format(msg));
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {}", self.format(msg));
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {}", self.format(msg));
    }
}
