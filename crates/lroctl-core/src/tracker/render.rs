//! Rendering backends for [`Tracker`](super::Tracker)

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde_json::json;

use super::{StageState, TrackerState, TrackerStatus};

/// Receives every tracker transition
///
/// Implementations must not fail: output errors are swallowed (and logged at
/// debug), because progress display must never abort a wait.
pub trait Render: Send {
    fn started(&mut self, state: &TrackerState);
    fn stage_changed(&mut self, state: &TrackerState, index: usize);
    fn detail_changed(&mut self, state: &TrackerState);
    fn warning(&mut self, state: &TrackerState, message: &str);
    fn finished(&mut self, state: &TrackerState);
}

/// Renders nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRender;

impl Render for NoopRender {
    fn started(&mut self, _state: &TrackerState) {}
    fn stage_changed(&mut self, _state: &TrackerState, _index: usize) {}
    fn detail_changed(&mut self, _state: &TrackerState) {}
    fn warning(&mut self, _state: &TrackerState, _message: &str) {}
    fn finished(&mut self, _state: &TrackerState) {}
}

/// `"message..."` or `"message... detail..."`
fn top_line(state: &TrackerState) -> String {
    match &state.detail {
        Some(detail) => format!("{}... {}...", state.message, detail),
        None => format!("{}...", state.message),
    }
}

/// Suffix printed after the top line when the tracker finishes
fn status_suffix(status: TrackerStatus) -> &'static str {
    match status {
        TrackerStatus::Success => "done.",
        TrackerStatus::Failure => "failed.",
        TrackerStatus::Interrupted => "aborted by ctrl-c.",
        TrackerStatus::Running => "",
    }
}

/// Format a stage state with a status glyph
fn stage_glyph(state: StageState) -> String {
    match state {
        StageState::Complete => "\u{2713}".green().to_string(), // checkmark
        StageState::Failed => "\u{2717}".red().to_string(),    // x mark
        StageState::Active => "\u{21bb}".cyan().to_string(),   // arrow circle
        StageState::Pending => " ".to_string(),
    }
}

/// Writes one structured line per transition
///
/// Used when the output stream is not a terminal (CI logs, redirected stderr).
pub struct LinesRender {
    out: Box<dyn Write + Send>,
}

impl LinesRender {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text).and_then(|_| self.out.flush()) {
            tracing::debug!("Failed to write progress line: {}", e);
        }
    }
}

impl Render for LinesRender {
    fn started(&mut self, state: &TrackerState) {
        let line = top_line(state);
        self.line(&line);
    }

    fn stage_changed(&mut self, state: &TrackerState, index: usize) {
        let stage = &state.stages[index];
        let line = match &stage.failure {
            Some(failure) => format!(
                "stage={} state={} message={:?} error={:?}",
                stage.key, stage.state, stage.message, failure
            ),
            None => format!(
                "stage={} state={} message={:?}",
                stage.key, stage.state, stage.message
            ),
        };
        self.line(&line);
    }

    fn detail_changed(&mut self, state: &TrackerState) {
        let line = top_line(state);
        self.line(&line);
    }

    fn warning(&mut self, _state: &TrackerState, message: &str) {
        self.line(&format!("warning: {}", message));
    }

    fn finished(&mut self, state: &TrackerState) {
        let line = format!("{}...{}", state.message, status_suffix(state.status));
        self.line(&line);
    }
}

/// Writes a single deterministic JSON line when the tracker finishes
///
/// Only tells a test that the tracker ran and how it ended, not what the
/// live display looked like.
pub struct StubRender {
    out: Box<dyn Write + Send>,
}

impl StubRender {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }
}

impl Render for StubRender {
    fn started(&mut self, _state: &TrackerState) {}
    fn stage_changed(&mut self, _state: &TrackerState, _index: usize) {}
    fn detail_changed(&mut self, _state: &TrackerState) {}
    fn warning(&mut self, _state: &TrackerState, _message: &str) {}

    fn finished(&mut self, state: &TrackerState) {
        let succeeded: Vec<&str> = state
            .stages
            .iter()
            .filter(|s| s.state == StageState::Complete)
            .map(|s| s.key.as_str())
            .collect();
        let failed = state
            .stages
            .iter()
            .find(|s| s.state == StageState::Failed)
            .map(|s| s.key.as_str());
        let record = json!({
            "ux": "STAGED_PROGRESS_TRACKER",
            "message": state.message,
            "status": state.status,
            "succeeded_stages": succeeded,
            "failed_stage": failed,
            "warnings": state.warnings,
        });
        if let Err(e) = writeln!(self.out, "{}", record).and_then(|_| self.out.flush()) {
            tracing::debug!("Failed to write tracker stub: {}", e);
        }
    }
}

/// Redraws a block in place on a terminal
///
/// The top line is a spinner with elapsed time; each stage gets its own row.
pub struct TerminalRender {
    multi: MultiProgress,
    top: Option<ProgressBar>,
    rows: Vec<ProgressBar>,
}

impl TerminalRender {
    pub fn stderr() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            top: None,
            rows: Vec::new(),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn row_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("  {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn row_message(state: &TrackerState, index: usize) -> String {
        let stage = &state.stages[index];
        match (&stage.failure, stage.state) {
            (Some(failure), _) => format!("{}: {}", stage.message, failure),
            (None, StageState::Active) => format!("{}...", stage.message),
            (None, _) => stage.message.clone(),
        }
    }
}

impl Render for TerminalRender {
    fn started(&mut self, state: &TrackerState) {
        let top = self.multi.add(ProgressBar::new_spinner());
        top.set_style(Self::spinner_style());
        top.set_message(top_line(state));
        top.enable_steady_tick(Duration::from_millis(100));

        self.rows = (0..state.stages.len())
            .map(|index| {
                let row = self.multi.add(ProgressBar::new_spinner());
                row.set_style(Self::row_style());
                row.set_prefix(stage_glyph(state.stages[index].state));
                row.set_message(Self::row_message(state, index));
                row.tick();
                row
            })
            .collect();
        self.top = Some(top);
    }

    fn stage_changed(&mut self, state: &TrackerState, index: usize) {
        if let Some(row) = self.rows.get(index) {
            row.set_prefix(stage_glyph(state.stages[index].state));
            row.set_message(Self::row_message(state, index));
            row.tick();
        }
    }

    fn detail_changed(&mut self, state: &TrackerState) {
        if let Some(top) = &self.top {
            top.set_message(top_line(state));
        }
    }

    fn warning(&mut self, _state: &TrackerState, message: &str) {
        let line = format!("{}{} {}", "warning".yellow().bold(), ":".bold(), message);
        if let Err(e) = self.multi.println(line) {
            tracing::debug!("Failed to print tracker warning: {}", e);
        }
    }

    fn finished(&mut self, state: &TrackerState) {
        for (index, row) in self.rows.iter().enumerate() {
            row.set_prefix(stage_glyph(state.stages[index].state));
            row.finish_with_message(Self::row_message(state, index));
        }
        if let Some(top) = &self.top {
            let suffix = match state.status {
                TrackerStatus::Success => status_suffix(state.status).green().to_string(),
                _ => status_suffix(state.status).red().to_string(),
            };
            top.finish_with_message(format!("{}...{}", state.message, suffix));
        }
    }
}

/// Cloneable in-memory writer for capturing tracker output
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
