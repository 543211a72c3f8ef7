use crate::lxp::packet::DeviceFunction;

/// Everything that can go wrong between the socket and a decoded register bank.
///
/// All of these are recoverable at session level: the offending frame or request is
/// dropped and polling carries on.
#[derive(Debug, thiserror::Error)]
pub enum LxpError {
    #[error("not enough bytes buffered for a complete frame")]
    Incomplete,

    #[error("frame does not start with the A1 1A prefix")]
    BadPrefix,

    #[error("declared length {declared} does not match {actual} bytes received")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: frame carries {expected:#06x}, computed {computed:#06x}")]
    ChecksumError { expected: u16, computed: u16 },

    #[error("unexpected function code {0:#04x}")]
    UnexpectedFunction(u8),

    #[error("unexpected device function {got:?}, expected {expected:?}")]
    UnexpectedDeviceFunction {
        expected: DeviceFunction,
        got: DeviceFunction,
    },

    #[error("unexpected register start {got}, expected {expected}")]
    UnexpectedRegisterStart { expected: u16, got: u16 },

    #[error("payload for register {register} too short: {actual} < {required} bytes")]
    PayloadTooShort {
        register: u16,
        required: usize,
        actual: usize,
    },

    #[error("connection to {0} failed")]
    ConnectionFailed(String),

    #[error("no response to {request} within {timeout_ms}ms")]
    ResponseTimeout { request: String, timeout_ms: u128 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!()).file_name().unwrap_or_default().to_string_lossy(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// Same as `file_error!`, with a source error appended
#[macro_export]
macro_rules! file_error_with_source {
    ($source:expr, $($arg:tt)*) => {
        anyhow!(
            "[{}:{}] {}: {}",
            std::path::Path::new(file!()).file_name().unwrap_or_default().to_string_lossy(),
            line!(),
            format!($($arg)*),
            $source
        )
    };
}
