use strata_core::error::{ErrorKind, StrataError};
use tonic::{Code, Status};

/// RPC status code of `err`.
///
/// Request and graph errors are the client's fault. Module faults are
/// reported as invalid arguments too: retrying the same request fails the
/// same way.
pub fn status_code(err: &StrataError) -> Code {
    match err.kind() {
        ErrorKind::InvalidRequest | ErrorKind::ModuleFault => Code::InvalidArgument,
        ErrorKind::Canceled => Code::Cancelled,
        ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
        ErrorKind::WorkerTransient => Code::Unavailable,
        _ if matches!(err, StrataError::StreamClosed { .. } | StrataError::JobFailed { .. }) => {
            Code::Unavailable
        }
        _ => Code::Internal,
    }
}

/// Convert `err` into an RPC status carrying its message.
pub fn to_status(err: &StrataError) -> Status {
    Status::new(status_code(err), err.to_string())
}
