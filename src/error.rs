use thiserror::Error;

/// The closed error taxonomy for the fault-management runtime (see SPEC_FULL.md §7).
///
/// Every fallible entry point in this crate returns `FaultlineResult<T>`. Fatal
/// conditions (out-of-memory, a malformed compiled condition handed to
/// `add_managed_alarm`) are not represented here — they are `panic!`s, by design.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FaultlineError {
    /// A malformed `AlarmId`, malformed subscription pattern, or unknown `Level` name.
    #[error("validation error: {0}")]
    Validation(String),

    /// The compiler rejected an AST: duplicate registration within one module,
    /// a style/parameter mismatch, or an invalid operator.
    #[error("compile error: {0}")]
    Compile(String),

    /// The Handler task has not been installed yet, or has terminated.
    #[error("handler unavailable")]
    HandlerUnavailable,

    /// `set_alarm`/`clear_alarm` was called with a value that doesn't resolve
    /// to a valid `AlarmId`. Never fatal — logged at `warn` and dropped.
    #[error("unsupported alarm value: {0}")]
    UnsupportedAlarm(String),

    /// A remedy callback exceeded its `callback_timeout_ms`.
    #[error("remedy timed out for {0}")]
    RemedyTimeout(String),

    /// A remedy callback task panicked.
    #[error("remedy crashed for {0}: {1}")]
    RemedyCrash(String, String),

    /// A timer delivery whose token no longer matches the live one for its id.
    /// Always silently dropped by the Handler; exposed here only so tests and
    /// logging call sites can name the condition.
    #[error("stale timer for {0}")]
    TimerLate(String),
}

pub type FaultlineResult<T> = Result<T, FaultlineError>;
