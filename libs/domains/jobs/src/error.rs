use core_config::ConfigError;
use stream_worker::StreamError;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::Dispatcher::enqueue`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler failed while running inline. Carries its report unchanged.
    #[error("job handler failed: {0:#}")]
    Handler(eyre::Report),

    /// The durable enqueue failed and inline fallback is disabled.
    #[error("durable enqueue failed: {0}")]
    Enqueue(#[from] StreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DispatchError {
    /// The handler's report, if the handler is what failed.
    pub fn handler_report(&self) -> Option<&eyre::Report> {
        match self {
            DispatchError::Handler(report) => Some(report),
            _ => None,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Marker a handler attaches to say whether retrying can help.
///
/// ```rust,ignore
/// return Err(JobFailure::permanent("chat not found").into());
/// ```
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobFailure {
    message: String,
    permanent: bool,
}

impl JobFailure {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }
}

/// Translate a handler report for the worker's retry machinery.
///
/// Permanent only when a [`JobFailure::permanent`] is somewhere in the chain.
pub fn to_stream_error(report: &eyre::Report) -> StreamError {
    let permanent = report
        .chain()
        .filter_map(|cause| cause.downcast_ref::<JobFailure>())
        .any(JobFailure::is_permanent);

    let message = format!("{:#}", report);
    if permanent {
        StreamError::permanent(message)
    } else {
        StreamError::transient(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;
    use stream_worker::ErrorCategory;

    #[test]
    fn test_plain_report_is_transient() {
        let err = to_stream_error(&eyre::eyre!("connection reset"));
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_permanent_marker_survives_context() {
        let report = Err::<(), _>(JobFailure::permanent("chat not found"))
            .wrap_err("sending message")
            .unwrap_err();

        let err = to_stream_error(&report);
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(err.to_string().contains("sending message: chat not found"));
    }

    #[test]
    fn test_handler_report_accessor() {
        let err = DispatchError::Handler(eyre::eyre!("boom"));
        assert_eq!(err.handler_report().unwrap().to_string(), "boom");
        assert!(DispatchError::Enqueue(StreamError::Closed).handler_report().is_none());
    }
}
