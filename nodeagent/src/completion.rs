//! Single-assignment completion slot for a run.

use tokio::sync::watch;

use crate::{Error, FAILED_EXIT_CODE, Result, RunResult};

/// Final outcome of a run: `(code, None)` or `(-1, Some(error))`.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    /// Exit code, `FAILED_EXIT_CODE` on failure.
    code: i32,
    /// Why the run failed, if it did.
    error: Option<Error>,
}

impl Completion {
    /// The node reported the process exit code.
    pub(crate) const fn exited(code: i32) -> Self {
        Self { code, error: None }
    }

    /// The run failed before an exit code was observed.
    pub(crate) const fn failed(error: Error) -> Self {
        Self {
            code: FAILED_EXIT_CODE,
            error: Some(error),
        }
    }

    /// Converts into the caller-facing result.
    pub(crate) fn into_result(self) -> Result<RunResult> {
        match self.error {
            None => Ok(RunResult { code: self.code }),
            Some(e) => Err(e),
        }
    }
}

/// Receiving side of a completion slot.
pub(crate) type CompletionRx = watch::Receiver<Option<Completion>>;

/// Write side of a completion slot. Settles at most once.
#[derive(Debug)]
pub(crate) struct CompletionSlot(watch::Sender<Option<Completion>>);

impl CompletionSlot {
    /// Creates an unsettled slot and its receiver.
    pub(crate) fn new() -> (Self, CompletionRx) {
        let (tx, rx) = watch::channel(None);
        (Self(tx), rx)
    }

    /// Stores `completion` if the slot is still empty.
    ///
    /// Returns `false` (and drops `completion`) if already settled.
    pub(crate) fn settle(&self, completion: Completion) -> bool {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(completion);
            true
        })
    }
}
