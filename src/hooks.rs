//! Progress and log capability hooks.
//!
//! Front-ends (CLI, GUI, tests) observe a build or recovery run through two
//! callbacks; the core never prints on its own. Both hooks are optional and
//! free when absent.

/// Called once per processed item: `(done, total, name)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize, &str) + Send + Sync + 'a;

/// Called with one-line human-readable messages.
pub type LogFn<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// The pair of observer hooks threaded through a run.
#[derive(Default)]
pub struct Hooks<'a> {
    pub on_progress: Option<&'a ProgressFn<'a>>,
    pub on_log: Option<&'a LogFn<'a>>,
}

impl<'a> Hooks<'a> {
    /// Hooks that observe nothing.
    pub fn none() -> Self {
        Hooks::default()
    }

    pub fn progress(&self, done: usize, total: usize, name: &str) {
        if let Some(f) = self.on_progress {
            f(done, total, name);
        }
    }

    pub fn log(&self, msg: &str) {
        if let Some(f) = self.on_log {
            f(msg);
        }
    }
}
