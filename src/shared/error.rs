//! Usage: Unified error model (maps internal failures to `CODE: message` strings).
//!
//! Codes used across the crate:
//! - `AUTH_SILENT_FAILED`: silent acquisition failed; interactive fallback applies.
//! - `AUTH_INTERACTIVE_FAILED`: interactive acquisition failed; terminal for the cycle.
//! - `SEC_INVALID_INPUT`: caller-supplied or remote data failed validation.
//! - `CONFIG_INVALID`: configuration could not be loaded or validated.
//! - `DB_ERROR`: token cache storage failure.
//! - `SYSTEM_ERROR`: transport, OS, or other environment failure.
//! - `TASK_JOIN`: a blocking task panicked or was cancelled.

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: String,
    message: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-tag an error with a new code, keeping the original message.
    pub fn with_code(self, code: &str) -> Self {
        Self {
            code: code.to_string(),
            message: self.message,
        }
    }
}

fn split_code_message(raw: &str) -> Option<(&str, &str)> {
    let msg = raw.trim();
    let (maybe_code, rest) = msg.split_once(':')?;
    let code = maybe_code.trim();
    let mut chars = code.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_') {
        return None;
    }
    Some((code, rest.trim()))
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        if let Some((code, rest)) = split_code_message(&value) {
            if !rest.is_empty() {
                return AppError::new(code.to_string(), rest.to_string());
            }
        }
        AppError::new("INTERNAL_ERROR", value)
    }
}

impl From<&'static str> for AppError {
    fn from(value: &'static str) -> Self {
        AppError::from(value.to_string())
    }
}

impl From<AppError> for String {
    fn from(value: AppError) -> Self {
        value.to_string()
    }
}

pub(crate) fn db_err<E: std::fmt::Display>(label: &'static str) -> impl Fn(E) -> AppError {
    move |err| AppError::new("DB_ERROR", format!("{label}: {err}"))
}
