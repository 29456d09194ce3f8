#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("invalid decision action {0:?}, expected \"approve\" or \"reject\"")]
    InvalidInput(String),
    #[error("approval ticket not found: {0}")]
    NotFound(String),
    #[error("ticket {0} has already been processed")]
    AlreadyProcessed(String),
    #[error("ticket {0} was resolved by a concurrent decision, refresh and retry")]
    Conflict(String),
    #[error("approval handler failed for ticket {ticket_id}, decision rolled back: {message}")]
    HandlerFailed { ticket_id: String, message: String },
    #[error(
        "CRITICAL: approval of ticket {ticket_id} failed and could not be rolled back, \
         manual intervention required. handler error: {handler_error}; rollback error: {rollback_error}"
    )]
    RollbackFailed {
        ticket_id: String,
        handler_error: String,
        rollback_error: String,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record encoding failure: {0}")]
    Codec(String),
}

impl From<minicbor::decode::Error> for ApprovalError {
    fn from(err: minicbor::decode::Error) -> Self {
        ApprovalError::Codec(err.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for ApprovalError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        ApprovalError::Codec(err.to_string())
    }
}

impl ApprovalError {
    /// Retryable errors leave the ticket pending; the caller may re-submit
    /// the same decision after addressing the cause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApprovalError::HandlerFailed { .. })
    }
}
