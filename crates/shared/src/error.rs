use thiserror::Error;

/// Failure talking to the upgrade job service. A `Rejected` response
/// carries the per-line error messages the backend wants surfaced.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("upgrade service returned HTTP {status}")]
    Rejected { status: u16, errors: Vec<String> },
    #[error("upgrade service unreachable: {0}")]
    Transport(String),
    #[error("invalid upgrade service response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Messages to append to the operator log, one per line.
    pub fn log_lines(&self) -> Vec<String> {
        match self {
            ServiceError::Rejected { errors, .. } if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Protocol or transport failure while opening the channel.
    #[error("connection error: {0}")]
    Setup(String),
    /// The open channel died abnormally. Fatal to this channel instance;
    /// there is no automatic retry.
    #[error("connection lost: {0}")]
    Lost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_service_error_logs_backend_lines() {
        let err = ServiceError::Rejected {
            status: 422,
            errors: vec!["no firmware staged".into(), "device type mismatch".into()],
        };
        assert_eq!(
            err.log_lines(),
            vec![
                "no firmware staged".to_string(),
                "device type mismatch".to_string()
            ]
        );
    }

    #[test]
    fn bodyless_rejection_falls_back_to_the_status_line() {
        let err = ServiceError::Rejected {
            status: 500,
            errors: Vec::new(),
        };
        assert_eq!(err.log_lines(), vec!["upgrade service returned HTTP 500"]);
    }
}
