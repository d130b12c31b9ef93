/// Exit code for unreadable input, bad flags, or I/O failures.
pub const EXIT_INPUT: u8 = 2;
/// Exit code when a mandatory fit (the negative control) lacks data.
pub const EXIT_INSUFFICIENT: u8 = 3;
/// Exit code when a mandatory fit fails numerically.
pub const EXIT_NUMERICAL: u8 = 4;
/// Exit code for broken data-pipeline invariants (caller bugs upstream).
pub const EXIT_INVARIANT: u8 = 5;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// An invariant violation: aborts the whole run.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(EXIT_INVARIANT, format!("Invariant violation: {}", message.into()))
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn is_invariant_violation(&self) -> bool {
        self.exit_code == EXIT_INVARIANT
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
