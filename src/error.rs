//! Error taxonomy for the core (spec §7).
//!
//! `ErrorKind` enumerates the seven kinds spec.md assigns meaning to; whether
//! an occurrence is *local* (drop one message, keep serving) or *fatal*
//! (process exits non-zero) is a property of the call site, not of the kind
//! itself, so it is decided by the caller via `CoreError::is_fatal`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolViolation,
    UnknownDevice,
    CausalViolation,
    ModelError,
    FabricError,
    RegistrationTimeout,
    Shutdown,
}

impl ErrorKind {
    /// Default fatality for this kind in isolation. `PROTOCOL_VIOLATION` is
    /// the one kind whose fatality is context-dependent per §7 (a single
    /// malformed message is local; a sequence regression on the framing
    /// stream is fatal) — call sites that know which case they're in should
    /// construct the `CoreError` with `CoreError::new_fatal`/`new_local`
    /// rather than rely on this default.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::CausalViolation | ErrorKind::FabricError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorKind::UnknownDevice => "UNKNOWN_DEVICE",
            ErrorKind::CausalViolation => "CAUSAL_VIOLATION",
            ErrorKind::ModelError => "MODEL_ERROR",
            ErrorKind::FabricError => "FABRIC_ERROR",
            ErrorKind::RegistrationTimeout => "REGISTRATION_TIMEOUT",
            ErrorKind::Shutdown => "SHUTDOWN",
        }
    }

    /// Numeric wire encoding for `ERROR_NOTIFY` bodies (local mapping, §7).
    pub fn wire_code(self) -> u32 {
        match self {
            ErrorKind::ProtocolViolation => 1,
            ErrorKind::UnknownDevice => 2,
            ErrorKind::CausalViolation => 3,
            ErrorKind::ModelError => 4,
            ErrorKind::FabricError => 5,
            ErrorKind::RegistrationTimeout => 6,
            ErrorKind::Shutdown => 7,
        }
    }

    pub fn from_wire_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => ErrorKind::ProtocolViolation,
            2 => ErrorKind::UnknownDevice,
            3 => ErrorKind::CausalViolation,
            4 => ErrorKind::ModelError,
            5 => ErrorKind::FabricError,
            6 => ErrorKind::RegistrationTimeout,
            7 => ErrorKind::Shutdown,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    fatal: bool,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let fatal = kind.is_fatal();
        CoreError { kind, message: message.into(), fatal }
    }

    /// Force fatal regardless of `kind`'s default — used for the framing-level
    /// `PROTOCOL_VIOLATION` cases (§7: sequence regression, bad header).
    pub fn new_fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError { kind, message: message.into(), fatal: true }
    }

    /// Force local regardless of `kind`'s default — used for the
    /// per-message `PROTOCOL_VIOLATION` case (§7: one malformed body).
    pub fn new_local(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError { kind, message: message.into(), fatal: false }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;

macro_rules! core_err_ctor {
    ($name:ident, $kind:expr) => {
        impl CoreError {
            pub fn $name(message: impl Into<String>) -> Self {
                CoreError::new($kind, message)
            }
        }
    };
}

core_err_ctor!(protocol_violation, ErrorKind::ProtocolViolation);
core_err_ctor!(unknown_device, ErrorKind::UnknownDevice);
core_err_ctor!(causal_violation, ErrorKind::CausalViolation);
core_err_ctor!(model_error, ErrorKind::ModelError);
core_err_ctor!(fabric_error, ErrorKind::FabricError);
core_err_ctor!(registration_timeout, ErrorKind::RegistrationTimeout);
core_err_ctor!(shutdown, ErrorKind::Shutdown);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_match_spec() {
        assert!(ErrorKind::CausalViolation.is_fatal());
        assert!(ErrorKind::FabricError.is_fatal());
        assert!(!ErrorKind::UnknownDevice.is_fatal());
        assert!(!ErrorKind::ModelError.is_fatal());
        assert!(!ErrorKind::ProtocolViolation.is_fatal());
    }

    #[test]
    fn wire_code_roundtrip() {
        for kind in [
            ErrorKind::ProtocolViolation,
            ErrorKind::UnknownDevice,
            ErrorKind::CausalViolation,
            ErrorKind::ModelError,
            ErrorKind::FabricError,
            ErrorKind::RegistrationTimeout,
            ErrorKind::Shutdown,
        ] {
            assert_eq!(ErrorKind::from_wire_code(kind.wire_code()), Some(kind));
        }
    }
}
