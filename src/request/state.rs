/// Request lifecycle state.
///
/// ```text
/// PENDING --submit--> queued in a processor
/// PENDING --Cancel--> CANCELLATION_PENDING --pop--> CANCELING --handler--> terminal
/// PROCESSING --Complete(status)--> queued in a completion context --> terminal
/// any non-terminal --Abort--> ABORT_PENDING (if PROCESSING) or straight to ABORTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    CancellationPending,
    Canceling,
    Processing,
    AbortPending,
    Aborted,
    Ok,
    Canceled,
}

impl RequestState {
    /// Terminal states are sticky: once reached, no further transition is
    /// permitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Ok | RequestState::Canceled | RequestState::Aborted)
    }

    pub fn is_pending_or_canceling(self) -> bool {
        matches!(
            self,
            RequestState::Pending | RequestState::CancellationPending | RequestState::Canceling
        )
    }
}
