//! Logging, progress UI and decode tracing.
//!
//! [`Notifier`] wraps `env_logger` (text logs) and `indicatif` (spinners/bars) under a single
//! verbosity switch:
//! - [`VerbosityLevel::Quiet`] → no text logs; a live spinner and optional progress bars.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] → standard logs.
//!
//! The decoder never logs on its own. It reports intermediate state through the
//! [`Trace`] capability handed in by the caller: a [`Notifier`] forwards it to trace-level
//! logs, [`NoTrace`] drops it and [`TraceCollector`] keeps it in memory.

use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Record};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Spinner only, no text logs
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Sink for the decoder's intermediate state.
pub trait Trace {
    fn record(&self, message: &str);
}

/// Discards every trace message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl Trace for NoTrace {
    fn record(&self, _message: &str) {}
}

/// Keeps trace messages in order of arrival.
#[derive(Debug, Default)]
pub struct TraceCollector {
    messages: Mutex<Vec<String>>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Trace for TraceCollector {
    fn record(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: env_logger::Logger,
    multi_progress: Option<Arc<MultiProgress>>,
    active_spinner: RefCell<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        let logger = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build();

        let multi_progress = if verbosity == VerbosityLevel::Quiet {
            Some(Arc::new(MultiProgress::new()))
        } else {
            None
        };

        Self {
            verbosity,
            logger,
            multi_progress,
            active_spinner: RefCell::new(None),
        }
    }

    fn emit(&self, level: Level, message: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }

    pub fn info(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.emit(Level::Info, message);
            return;
        }

        // Lazily start the spinner on the first message
        if self.active_spinner.borrow().is_none() {
            if let Some(multi_progress) = &self.multi_progress {
                let spinner = multi_progress.add(ProgressBar::new_spinner());
                let template = ProgressStyle::default_spinner().template("{spinner:.green} {msg}");
                if let Ok(style) = template {
                    spinner.set_style(style);
                }
                spinner.enable_steady_tick(Duration::from_millis(100));
                *self.active_spinner.borrow_mut() = Some(spinner);
            }
        }

        if let Some(spinner) = self.active_spinner.borrow().as_ref() {
            spinner.set_message(message.to_string());
        }
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::Debug, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    pub fn trace(&self, message: &str) {
        self.emit(Level::Trace, message);
    }

    /// Clears the spinner so that output written afterwards is not overdrawn.
    pub fn finish(&self) {
        if let Some(spinner) = self.active_spinner.borrow_mut().take() {
            spinner.finish_and_clear();
        }
    }

    pub fn create_progress_bar(&self, length: u64, message: &str) -> Option<ProgressBar> {
        let multi_progress = self.multi_progress.as_ref()?;
        let progress_bar = multi_progress.add(ProgressBar::new(length));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
        {
            progress_bar.set_style(style.progress_chars("=> "));
        }
        progress_bar.set_message(message.to_string());
        Some(progress_bar)
    }

    pub fn progress(&self, current: u64, total: u64, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.info(&format!("{}: {}/{}", message, current, total));
        }
    }

    pub fn use_beautiful_progress(&self) -> bool {
        self.verbosity == VerbosityLevel::Quiet
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }
}

impl Trace for Notifier {
    fn record(&self, message: &str) {
        self.trace(message);
    }
}
