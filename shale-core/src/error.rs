use crate::source::Source;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Setup error: {0}")]
    SetupError(String, Option<Source>),

    #[error("Binding error: {0}")]
    BindingError(String, Option<Source>),

    #[error("Override error: {0}")]
    OverrideError(String, Option<Source>),

    #[error("Runtime error: {0}")]
    RuntimeError(String, Option<Source>),
}

impl ExecError {
    pub fn source(&self) -> Option<Source> {
        match self {
            Self::SetupError(_, source) => *source,
            Self::BindingError(_, source) => *source,
            Self::OverrideError(_, source) => *source,
            Self::RuntimeError(_, source) => *source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;

// Bail macros without a source location

#[macro_export]
macro_rules! bail_setup {
    ($($arg:tt)*) => {
        return Err($crate::error::ExecError::SetupError(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_binding {
    ($($arg:tt)*) => {
        return Err($crate::error::ExecError::BindingError(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_override {
    ($($arg:tt)*) => {
        return Err($crate::error::ExecError::OverrideError(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_runtime {
    ($($arg:tt)*) => {
        return Err($crate::error::ExecError::RuntimeError(format!($($arg)*), None))
    };
}

// Bail macros with a source location

#[macro_export]
macro_rules! bail_override_at {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::error::ExecError::OverrideError(format!($($arg)*), Some($source)))
    };
}

#[macro_export]
macro_rules! bail_runtime_at {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::error::ExecError::RuntimeError(format!($($arg)*), Some($source)))
    };
}
