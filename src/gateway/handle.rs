//! Handle to a submitted invocation.

use super::state::{CancelOutcome, InvocationState, Lifecycle};
use super::{InvocationError, InvocationResult, InvocationStatus};
use crate::models::UseCase;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Returned by [`InvocationGateway::submit`](super::InvocationGateway::submit).
///
/// Dropping the handle does not cancel the invocation.
#[derive(Debug)]
pub struct InvocationHandle {
    pub(crate) request_id: Uuid,
    pub(crate) use_case: UseCase,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) task: JoinHandle<InvocationResult>,
}

impl InvocationHandle {
    /// Id of the underlying request.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InvocationState {
        self.lifecycle.state()
    }

    /// Request cancellation.
    ///
    /// Before the remote call starts, no attempt is made. During a remote
    /// call, the call is abandoned and its attempt is recorded as
    /// `Cancelled`. After completion this has no effect.
    pub fn cancel(&self) -> CancelOutcome {
        self.lifecycle.cancel()
    }

    /// Wait for the final result.
    ///
    /// If the task panicked or was aborted, the result carries
    /// [`InvocationError::TaskFailed`].
    pub async fn outcome(self) -> InvocationResult {
        match self.task.await {
            Ok(result) => result,
            Err(e) => InvocationResult {
                request_id: self.request_id,
                use_case: self.use_case,
                status: InvocationStatus::FatalFailure,
                model_used: None,
                attempts: Vec::new(),
                emergency_override: false,
                output: Err(InvocationError::TaskFailed(e.to_string())),
            },
        }
    }
}
