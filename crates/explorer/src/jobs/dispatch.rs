//! Where background commands are sent.

use std::future::Future;
use std::pin::Pin;

use protocol::{Envelope, JobId};

use super::interactor::JobInteractor;
use crate::error::Result;

/// Accepts commands for background execution.
///
/// The in-process [`JobInteractor`] implements this directly; processes that
/// talk to a separate worker use [`IpcDispatcher`](crate::ipc::IpcDispatcher).
pub trait Dispatcher: Send + Sync {
    /// Queue `envelope`, returning its id once accepted.
    fn dispatch<'a>(
        &'a self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + 'a>>;
}

impl Dispatcher for JobInteractor {
    fn dispatch<'a>(
        &'a self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<JobId>> + Send + 'a>> {
        Box::pin(async move { self.send(envelope) })
    }
}
