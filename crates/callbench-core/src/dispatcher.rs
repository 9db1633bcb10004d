//! Bounded, resumable dispatch of examples across workers
//!
//! The dispatcher subtracts the ids already in the checkpoint from the input,
//! spawns one task per remaining example and bounds how many run at once
//! with a semaphore. Each task appends its own record; dropped examples and
//! panicking tasks are reported in the summary and never abort the run.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::checkpoint::CheckpointStore;
use crate::core_types::Example;
use crate::dataset::dedupe_by_id;
use crate::errors::EvalError;
use crate::worker::{ExampleWorker, WorkerOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchProgress {
    Started {
        total: usize,
        skipped: usize,
    },
    ExampleFinished {
        id: String,
        recorded: bool,
        completed: usize,
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedExample {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    /// Examples handed to workers in this run.
    pub submitted: usize,
    /// Examples already present in the checkpoint.
    pub skipped: usize,
    /// Repeated ids removed from the input.
    pub duplicates: usize,
    pub recorded: usize,
    pub dropped: Vec<DroppedExample>,
}

pub struct Dispatcher {
    store: Arc<CheckpointStore>,
    worker: Arc<dyn ExampleWorker>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<CheckpointStore>, worker: Arc<dyn ExampleWorker>) -> Self {
        Self {
            store,
            worker,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self, examples: Vec<Example>) -> Result<DispatchSummary, EvalError> {
        self.run_with_progress(examples, |_| {}).await
    }

    /// Fails only when the checkpoint cannot be read; everything that goes
    /// wrong for a single example ends up in [`DispatchSummary::dropped`].
    pub async fn run_with_progress<F>(
        &self,
        examples: Vec<Example>,
        mut on_progress: F,
    ) -> Result<DispatchSummary, EvalError>
    where
        F: FnMut(DispatchProgress),
    {
        let (examples, duplicates) = dedupe_by_id(examples);
        if duplicates > 0 {
            log::warn!("Ignoring {} examples with repeated ids", duplicates);
        }

        let completed = self.store.completed_ids()?;
        let input_len = examples.len();
        let pending: Vec<Example> = examples
            .into_iter()
            .filter(|example| !completed.contains(&example.id))
            .collect();

        let total = pending.len();
        let mut summary = DispatchSummary {
            submitted: total,
            skipped: input_len - total,
            duplicates,
            ..Default::default()
        };
        log::info!(
            "{} examples to evaluate, {} already in {}",
            total,
            summary.skipped,
            self.store.path().display()
        );
        on_progress(DispatchProgress::Started {
            total,
            skipped: summary.skipped,
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        let mut task_to_example = HashMap::new();

        for example in pending {
            let example_id = example.id.clone();
            let semaphore = semaphore.clone();
            let worker = self.worker.clone();
            let store = self.store.clone();
            let submitted_id = example_id.clone();

            let handle = join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EvalError::WorkerError(e.to_string()))?;
                let outcome = match worker.evaluate(example).await {
                    WorkerOutcome::Recorded { record } if record.id != submitted_id => {
                        WorkerOutcome::Dropped {
                            reason: format!("worker returned a record for '{}'", record.id),
                            id: submitted_id,
                        }
                    }
                    outcome => outcome,
                };
                if let WorkerOutcome::Recorded { record } = &outcome {
                    store.append(record).await?;
                }
                Ok::<WorkerOutcome, EvalError>(outcome)
            });
            task_to_example.insert(handle.id(), example_id);
        }

        let mut finished = 0;
        while let Some(joined) = join_set.join_next_with_id().await {
            finished += 1;
            let (id, recorded) = match joined {
                Ok((_, Ok(WorkerOutcome::Recorded { record }))) => {
                    summary.recorded += 1;
                    (record.id, true)
                }
                Ok((_, Ok(WorkerOutcome::Dropped { id, reason }))) => {
                    summary.dropped.push(DroppedExample {
                        id: id.clone(),
                        reason,
                    });
                    (id, false)
                }
                Ok((task_id, Err(e))) => {
                    let id = task_to_example.remove(&task_id).unwrap_or_default();
                    log::error!("Example {} failed: {}", id, e);
                    summary.dropped.push(DroppedExample {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                    (id, false)
                }
                Err(e) => {
                    let id = task_to_example.remove(&e.id()).unwrap_or_default();
                    let reason = if e.is_panic() {
                        format!("worker panicked: {}", e)
                    } else {
                        e.to_string()
                    };
                    log::error!("Example {} aborted: {}", id, reason);
                    summary.dropped.push(DroppedExample {
                        id: id.clone(),
                        reason,
                    });
                    (id, false)
                }
            };
            on_progress(DispatchProgress::ExampleFinished {
                id,
                recorded,
                completed: finished,
                total,
            });
        }

        log::info!(
            "Run finished: {} recorded, {} dropped",
            summary.recorded,
            summary.dropped.len()
        );
        Ok(summary)
    }
}
