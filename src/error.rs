use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of a single call to an external service.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection refused/reset, timeout, DNS failure or a broken body read.
    #[error("transport failure talking to {service}: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{service} responded with HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid request to {service}: {message}")]
    Request {
        service: &'static str,
        message: String,
    },
}

impl FetchError {
    pub fn transport(service: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            service,
            source: source.into(),
        }
    }

    /// Sorts a reqwest failure into transport vs. request-construction errors.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() {
            Self::Request {
                service,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                service,
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::transport(service, err)
        }
    }

    /// Only transport-level failures are worth another attempt; an error
    /// status is the service's answer and will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// A failure that tears the whole pipeline down.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{channel} channel closed while records were still being delivered")]
    ChannelClosed { channel: &'static str },
    #[error("failed writing {sink} records")]
    Sink {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn only_transport_failures_are_retryable() {
        let reset = FetchError::transport("weather", io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_retryable());

        let status = FetchError::Status {
            service: "weather",
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert!(!status.is_retryable());
    }

    #[test]
    fn exhausted_retries_keep_the_last_cause() {
        let err = PipelineError::RetriesExhausted {
            operation: "stream connect",
            attempts: 5,
            source: FetchError::transport("twitter", io::Error::from(io::ErrorKind::TimedOut)),
        };
        assert_eq!(err.to_string(), "stream connect failed after 5 attempts");
        assert!(StdError::source(&err)
            .map(|cause| cause.to_string().contains("twitter"))
            .unwrap_or(false));
    }
}
