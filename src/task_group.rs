use crate::error::PipelineError;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// A nursery for pipeline stages.
///
/// `join` does not return until every spawned task has exited. The first
/// task to fail cancels the shared token so the rest unwind, and that first
/// error is what `join` reports.
pub struct TaskGroup {
    tasks: JoinSet<Result<(), PipelineError>>,
    names: HashMap<Id, &'static str>,
    cancel: CancellationToken,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            cancel,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let span = tracing::info_span!("stage", name);
        let handle = self.tasks.spawn(task.instrument(span));
        self.names.insert(handle.id(), name);
    }

    pub async fn join(mut self) -> Result<(), PipelineError> {
        let mut first_error: Option<PipelineError> = None;

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let (name, result) = match joined {
                Ok((id, result)) => (self.name_of(id), result),
                Err(err) => {
                    let stage = self.name_of(err.id());
                    let message = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        err.to_string()
                    };
                    (stage, Err(PipelineError::StageFailed { stage, message }))
                }
            };

            match result {
                Ok(()) => tracing::debug!(stage = name, "stage exited"),
                Err(err) if first_error.is_none() && !self.cancel.is_cancelled() => {
                    tracing::error!(stage = name, error = %err, "stage failed; cancelling pipeline");
                    self.cancel.cancel();
                    first_error = Some(err);
                }
                // Neighbours of a stopped stage see closed channels while unwinding.
                Err(err) => tracing::debug!(stage = name, error = %err, "stage error during teardown"),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn name_of(&self, id: Id) -> &'static str {
        self.names.get(&id).copied().unwrap_or("unknown")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "panicked".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn completes_when_every_task_finishes() {
        let mut group = TaskGroup::new(CancellationToken::new());
        group.spawn("a", async { Ok(()) });
        group.spawn("b", async { Ok(()) });
        assert!(group.join().await.is_ok());
    }

    #[tokio::test]
    async fn first_failure_cancels_siblings_and_waits_for_them() {
        let mut group = TaskGroup::new(CancellationToken::new());
        let cleaned_up = Arc::new(AtomicBool::new(false));

        let token = group.token();
        let flag = cleaned_up.clone();
        group.spawn("waiter", async move {
            token.cancelled().await;
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        group.spawn("failing", async {
            Err(PipelineError::ChannelClosed { channel: "test" })
        });

        let err = group.join().await.unwrap_err();
        assert!(matches!(err, PipelineError::ChannelClosed { channel: "test" }));
        assert!(cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn errors_after_external_cancel_are_not_failures() {
        let cancel = CancellationToken::new();
        let mut group = TaskGroup::new(cancel.clone());
        let token = group.token();
        group.spawn("unwinding", async move {
            token.cancelled().await;
            Err(PipelineError::ChannelClosed { channel: "test" })
        });
        cancel.cancel();
        assert!(group.join().await.is_ok());
    }

    #[tokio::test]
    async fn panicking_stage_is_reported() {
        let mut group = TaskGroup::new(CancellationToken::new());
        group.spawn("boom", async {
            if true {
                panic!("stage exploded");
            }
            Ok(())
        });
        group.spawn("steady", async { Ok(()) });
        let err = group.join().await.unwrap_err();
        match err {
            PipelineError::StageFailed { stage, message } => {
                assert_eq!(stage, "boom");
                assert_eq!(message, "stage exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
