//! Per-example workers
//!
//! A worker takes one example from the dispatcher and returns a
//! [`WorkerOutcome`]: either a record to append to the checkpoint, or a
//! dropped example that stays eligible for the next run. Workers build their
//! own model client, response evaluator and log sink for every example, so no
//! per-example state is shared.
//!
//! [`InProcessWorker`] evaluates on the current runtime. [`SubprocessWorker`]
//! runs each example in a child process executing the `worker` subcommand,
//! which reads the example from stdin and writes the outcome as one JSON line
//! to stdout via [`run_stdio_worker`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::EvalSettings;
use crate::core_types::Example;
use crate::errors::EvalError;
use crate::evaluator::{LlmJudge, ResponseEvaluator};
use crate::llm::create_llm_client;
use crate::logging::ExampleLog;
use crate::record::ResultRecord;
use crate::registry::{ModelContext, ModelRegistry};
use crate::runner::ModelRunner;
use crate::tools::ToolInvoker;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Recorded { record: ResultRecord },
    Dropped { id: String, reason: String },
}

impl WorkerOutcome {
    pub fn example_id(&self) -> &str {
        match self {
            WorkerOutcome::Recorded { record } => &record.id,
            WorkerOutcome::Dropped { id, .. } => id,
        }
    }
}

#[async_trait]
pub trait ExampleWorker: Send + Sync {
    async fn evaluate(&self, example: Example) -> WorkerOutcome;
}

/// Runs the conversation, grades a closing free-text answer and builds the
/// record. Examples that end in the error state are dropped.
pub async fn evaluate_example(
    runner: &dyn ModelRunner,
    evaluator: Option<&dyn ResponseEvaluator>,
    example: &Example,
) -> WorkerOutcome {
    let outcome = runner.run(example).await;

    if outcome.is_error() {
        let reason = outcome
            .message
            .map(|message| message.content)
            .unwrap_or_else(|| "unknown error".to_string());
        log::error!("Example {} dropped: {}", example.id, reason);
        return WorkerOutcome::Dropped {
            id: example.id.clone(),
            reason,
        };
    }

    let resp_eval = match (outcome.final_answer(), evaluator) {
        (Some(answer), Some(evaluator)) => evaluator.score(example, answer).await,
        _ => None,
    };

    WorkerOutcome::Recorded {
        record: ResultRecord {
            id: example.id.clone(),
            gen_convs: outcome.generated_conversation,
            message: outcome.message,
            count_dict: outcome.counts,
            resp_eval,
        },
    }
}

/// Shared, read-only inputs for building per-example runners.
pub struct EvaluationContext {
    pub model_name: String,
    pub settings: EvalSettings,
    pub registry: Arc<ModelRegistry>,
    pub tools: Arc<dyn ToolInvoker>,
    /// Directory for per-example log files; `None` disables them.
    pub log_dir: Option<PathBuf>,
}

impl EvaluationContext {
    fn example_log(&self, example_id: &str) -> ExampleLog {
        let Some(dir) = &self.log_dir else {
            return ExampleLog::disabled(example_id);
        };
        ExampleLog::create(dir, example_id).unwrap_or_else(|e| {
            log::warn!("No log file for example {}: {}", example_id, e);
            ExampleLog::disabled(example_id)
        })
    }

    fn judge(&self) -> Option<LlmJudge> {
        if !self.settings.judge.enabled {
            return None;
        }
        let llm = create_llm_client(
            &self.settings.endpoint,
            &self.settings.judge.model,
            &self.settings.runner.parameters,
        );
        Some(LlmJudge::new(llm, self.settings.retry.judge.clone()))
    }
}

pub struct InProcessWorker {
    ctx: Arc<EvaluationContext>,
}

impl InProcessWorker {
    pub fn new(ctx: Arc<EvaluationContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ExampleWorker for InProcessWorker {
    async fn evaluate(&self, example: Example) -> WorkerOutcome {
        let log = Arc::new(self.ctx.example_log(&example.id));
        let runner = match self.ctx.registry.build_runner(ModelContext {
            model_name: &self.ctx.model_name,
            settings: &self.ctx.settings,
            tools: self.ctx.tools.clone(),
            log: log.clone(),
        }) {
            Ok(runner) => runner,
            Err(e) => {
                return WorkerOutcome::Dropped {
                    id: example.id,
                    reason: e.to_string(),
                }
            }
        };
        let judge = self.ctx.judge();

        let outcome = evaluate_example(
            runner.as_ref(),
            judge.as_ref().map(|j| j as &dyn ResponseEvaluator),
            &example,
        )
        .await;

        match &outcome {
            WorkerOutcome::Recorded { record } => log.info(format!(
                "recorded with counts {:?}, resp_eval {}",
                record.count_dict,
                record.resp_eval.is_some()
            )),
            WorkerOutcome::Dropped { reason, .. } => log.error(format!("dropped: {}", reason)),
        }
        outcome
    }
}

/// Evaluates each example in a child process.
pub struct SubprocessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessWorker {
    /// `args` are passed to every child; the example goes in on stdin.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    async fn spawn(&self, example: &Example) -> Result<WorkerOutcome, EvalError> {
        let payload = serde_json::to_vec(example)?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvalError::WorkerError(format!("Failed to start worker: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(&payload).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await;
            if let Err(e) = written {
                log::debug!("Worker for {} closed stdin early: {}", example.id, e);
            }
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().rev().find(|line| !line.trim().is_empty());

        match last_line {
            Some(line) => serde_json::from_str(line).map_err(|e| {
                EvalError::WorkerError(format!("Unreadable worker output ({}): {}", output.status, e))
            }),
            None => Err(EvalError::WorkerError(format!(
                "Worker exited with {} and no outcome",
                output.status
            ))),
        }
    }
}

#[async_trait]
impl ExampleWorker for SubprocessWorker {
    async fn evaluate(&self, example: Example) -> WorkerOutcome {
        match self.spawn(&example).await {
            Ok(outcome) => outcome,
            Err(e) => WorkerOutcome::Dropped {
                id: example.id,
                reason: e.to_string(),
            },
        }
    }
}

/// Body of the `worker` subcommand: one example from stdin, one outcome
/// line on stdout.
pub async fn run_stdio_worker(ctx: Arc<EvaluationContext>) -> Result<(), EvalError> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;
    let example: Example = serde_json::from_str(input.trim())
        .map_err(|e| EvalError::WorkerError(format!("Invalid example on stdin: {}", e)))?;

    let outcome = InProcessWorker::new(ctx).evaluate(example).await;

    let mut line = serde_json::to_string(&outcome)?;
    line.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CountDict;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_shape() {
        let dropped = WorkerOutcome::Dropped {
            id: "ex9".to_string(),
            reason: "model returned no response".to_string(),
        };
        let value = serde_json::to_value(&dropped).unwrap();
        assert_eq!(value, json!({"status": "dropped", "id": "ex9", "reason": "model returned no response"}));

        let recorded = WorkerOutcome::Recorded {
            record: ResultRecord {
                id: "ex1".to_string(),
                gen_convs: vec![],
                message: None,
                count_dict: CountDict::default(),
                resp_eval: None,
            },
        };
        let line = serde_json::to_string(&recorded).unwrap();
        let back: WorkerOutcome = serde_json::from_str(&line).unwrap();
        assert_eq!(back.example_id(), "ex1");
        assert_eq!(back, recorded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_outcome_from_last_stdout_line() {
        let script = r#"read line; echo "starting"; echo '{"status":"dropped","id":"ex1","reason":"scripted"}'"#;
        let worker = SubprocessWorker::new("sh", vec!["-c".to_string(), script.to_string()]);
        let example: Example =
            serde_json::from_value(json!({"id": "ex1", "conversations": []})).unwrap();

        let outcome = worker.evaluate(example).await;
        assert_eq!(
            outcome,
            WorkerOutcome::Dropped {
                id: "ex1".to_string(),
                reason: "scripted".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_subprocess_is_dropped() {
        let worker = SubprocessWorker::new("sh", vec!["-c".to_string(), "cat > /dev/null; exit 3".to_string()]);
        let example: Example =
            serde_json::from_value(json!({"id": "ex2", "conversations": []})).unwrap();

        match worker.evaluate(example).await {
            WorkerOutcome::Dropped { id, reason } => {
                assert_eq!(id, "ex2");
                assert!(reason.contains("no outcome"));
            }
            other => panic!("expected drop, got {:?}", other),
        }
    }
}
