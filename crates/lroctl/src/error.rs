//! Error types for lroctl
//!
//! Wraps the core [`WaitError`] with the CLI's own failures and renders them
//! as cargo-style diagnostics.

use colored::Colorize;
use lroctl_core::{ConfigError, WaitError};
use thiserror::Error;

/// Cargo-style diagnostic formatter for CLI errors.
///
/// Produces structured output like:
/// ```text
/// error: Operation [projects/p/global/operations/op-1] has not finished in 300 seconds.
///   caused by: ...
///
///   tip: the operation may still be running; wait again:
///       lroctl wait projects/p/global/operations/op-1 --endpoint <URL>
/// ```
pub struct CliDiagnostic {
    message: String,
    details: Vec<String>,
    tips: Vec<(String, Vec<String>)>,
}

impl CliDiagnostic {
    /// Start a new error diagnostic with the given message.
    pub fn error(message: &str) -> Self {
        Self {
            message: message.to_string(),
            details: Vec::new(),
            tips: Vec::new(),
        }
    }

    /// Add a detail line below the error message.
    pub fn detail(mut self, text: &str) -> Self {
        self.details.push(text.to_string());
        self
    }

    /// Add a tip with optional example commands.
    pub fn tip(mut self, description: &str, commands: &[&str]) -> Self {
        self.tips.push((
            description.to_string(),
            commands.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Print the diagnostic to stderr with colored formatting.
    pub fn print(&self) {
        eprint!("{}{}", "error".red().bold(), ": ".bold());
        eprintln!("{}", self.message);

        for detail in &self.details {
            eprintln!("  {}", detail);
        }

        for (description, commands) in &self.tips {
            eprintln!();
            eprint!("  {}{}", "tip".yellow().bold(), ": ".bold());
            eprintln!("{}", description);
            for cmd in commands {
                eprintln!("      {}", cmd);
            }
        }
    }
}

/// Main error type for the lroctl application
#[derive(Error, Debug)]
pub enum LroctlError {
    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Output formatting error: {message}")]
    OutputError { message: String },
}

/// Result type for lroctl operations
pub type Result<T> = std::result::Result<T, LroctlError>;

impl LroctlError {
    /// Process exit code: the wait outcome's code, 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            LroctlError::Wait(err) => err.exit_code(),
            _ => 1,
        }
    }

    /// Get helpful suggestions for resolving this error
    pub fn suggestions(&self) -> Vec<(String, Vec<String>)> {
        match self {
            LroctlError::Wait(WaitError::Timeout { operation, .. }) => vec![(
                "the operation may still be running; wait again with a longer timeout:".to_string(),
                vec![format!(
                    "lroctl wait {} --endpoint <URL> --timeout <SECONDS>",
                    operation
                )],
            )],
            LroctlError::Wait(WaitError::Cancelled { operation }) => vec![(
                "waiting stopped but the operation was not cancelled; resume with:".to_string(),
                vec![format!("lroctl wait {} --endpoint <URL>", operation)],
            )],
            LroctlError::Wait(WaitError::FatalPoll { source, .. })
                if source.message().starts_with("HTTP 404") =>
            {
                vec![(
                    "check the operation name and that --endpoint points at the right API version"
                        .to_string(),
                    vec![],
                )]
            }
            LroctlError::Wait(WaitError::InvalidReference { .. }) => vec![(
                "operation names look like:".to_string(),
                vec![
                    "projects/<project>/global/operations/<id>".to_string(),
                    "projects/<project>/regions/<region>/operations/<id>".to_string(),
                    "projects/<project>/zones/<zone>/operations/<id>".to_string(),
                    "projects/<project>/locations/<location>/operations/<id>".to_string(),
                ],
            )],
            LroctlError::Wait(WaitError::Config(_)) | LroctlError::Configuration(_) => vec![(
                "check the configuration file:".to_string(),
                vec!["lroctl config path".to_string(), "lroctl config show".to_string()],
            )],
            LroctlError::InvalidInput { .. } => vec![(
                "check the command syntax:".to_string(),
                vec!["lroctl wait --help".to_string()],
            )],
            _ => vec![],
        }
    }

    /// Print a cargo-style diagnostic to stderr using colored formatting.
    ///
    /// With `show_sources` the full error source chain is listed.
    pub fn print_diagnostic(&self, show_sources: bool) {
        let mut diag = CliDiagnostic::error(&self.to_string());

        if let LroctlError::Wait(WaitError::Operation { error, .. }) = self {
            for detail in &error.details {
                diag = diag.detail(&format!("detail: {}", detail));
            }
        }

        if show_sources {
            let mut source = std::error::Error::source(self);
            while let Some(cause) = source {
                diag = diag.detail(&format!("caused by: {}", cause));
                source = cause.source();
            }
        }

        for (description, commands) in self.suggestions() {
            let commands: Vec<&str> = commands.iter().map(String::as_str).collect();
            diag = diag.tip(&description, &commands);
        }

        diag.print();
    }
}

impl From<ConfigError> for LroctlError {
    fn from(err: ConfigError) -> Self {
        LroctlError::Configuration(err.to_string())
    }
}

impl From<anyhow::Error> for LroctlError {
    fn from(err: anyhow::Error) -> Self {
        LroctlError::OutputError {
            message: err.to_string(),
        }
    }
}
