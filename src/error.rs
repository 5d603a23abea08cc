//! Result-code error model (§7).
//!
//! Every fallible operation in the engine returns a [`Result`]; there are no
//! panics on the hot path. `Error` enumerates the closed set of result-code
//! kinds from the specification. `Ok` is represented by `Result::Ok` and has
//! no corresponding variant.

use thiserror::Error;

/// The closed set of result-code kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// Normal termination requested by a processor or reached by a reader.
    #[error("end of file")]
    EndOfFile,

    #[error("buffer too small: need {needed}, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("syntax error at {context}: {message}")]
    SyntaxError { context: String, message: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("operation failed: {0}")]
    OpFailed(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Context carried alongside a logged, non-fatal error (`notify`/`exec`
/// failures per §7) so the log line can name the originating proc/variable.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub proc_label: Option<String>,
    pub proc_sfx_id: Option<u32>,
    pub var_vid: Option<u32>,
    pub var_channel: Option<i32>,
    pub csv_row: Option<usize>,
}

impl ErrorContext {
    pub fn for_proc(label: impl Into<String>, sfx_id: u32) -> Self {
        Self {
            proc_label: Some(label.into()),
            proc_sfx_id: Some(sfx_id),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, vid: u32, channel: i32) -> Self {
        self.var_vid = Some(vid);
        self.var_channel = Some(channel);
        self
    }

    pub fn with_csv_row(mut self, row: usize) -> Self {
        self.csv_row = Some(row);
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(label) = &self.proc_label {
            write!(f, "proc={}:{} ", label, self.proc_sfx_id.unwrap_or(0))?;
        }
        if let Some(vid) = self.var_vid {
            write!(f, "var={} ch={} ", vid, self.var_channel.unwrap_or(-1))?;
        }
        if let Some(row) = self.csv_row {
            write!(f, "csv_row={} ", row)?;
        }
        Ok(())
    }
}

/// Logs a non-fatal `notify`/`exec` failure per the §7 propagation policy:
/// the value set (or cycle) is discarded but the network keeps running.
pub fn log_recoverable(ctx: &ErrorContext, err: &Error) {
    tracing::warn!(%ctx, %err, "recoverable failure");
}
