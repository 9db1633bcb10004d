//! Conversation runner: the per-example state machine
//!
//! A runner replays one example against a model. The conversation is seeded
//! with the example's leading system and user turns, then alternates between
//! asking the model for its next turn and executing the function calls it
//! emits:
//!
//! ```text
//! AwaitingModelTurn -> ModelResponded -> ExecutingCalls -> AwaitingModelTurn
//!                                     \-> Terminal(Success | Mismatch | Error)
//! ```
//!
//! Emitted calls are scored against the remaining calls of the current gold
//! turn as a set. Every match counts toward `correct_call_num`; a turn is
//! complete once all of its gold calls have been matched, possibly over
//! several model turns. A model turn that matches nothing ends scoring with a
//! mismatch, keeping the partial conversation. Model or tool calls that
//! exhaust their retry policy end the example in `Error`; such examples are
//! not recorded.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{EvalSettings, ObservationSource};
use crate::core_types::{Example, FunctionCall, Message, Role, ToolCall, ToolMetadata, Turn};
use crate::errors::EvalError;
use crate::llm::{LLMResponse, LLM};
use crate::logging::ExampleLog;
use crate::record::{CountDict, ErrorType, TerminalMessage};
use crate::retry::RetryPolicy;
use crate::tools::{responses_equal, ToolError, ToolInvoker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Success,
    Mismatch,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    AwaitingModelTurn,
    ModelResponded,
    ExecutingCalls,
    Terminal(TerminalState),
}

/// Result of running one example to a terminal state.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub generated_conversation: Vec<Turn>,
    pub message: Option<TerminalMessage>,
    /// Number of gold turns fully matched.
    pub turn_id: usize,
    pub correct_count: usize,
    pub state: TerminalState,
    pub counts: CountDict,
}

impl RunOutcome {
    /// The closing free-text answer, if the conversation ends with one.
    pub fn final_answer(&self) -> Option<&str> {
        self.generated_conversation
            .last()
            .filter(|turn| turn.is_final_answer())
            .and_then(Turn::text)
    }

    pub fn is_error(&self) -> bool {
        self.state == TerminalState::Error
    }
}

/// Runs one example to completion. Implementations never fail: every
/// problem is folded into the outcome's terminal state.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn run(&self, example: &Example) -> RunOutcome;
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub model_retry: RetryPolicy,
    pub tool_retry: RetryPolicy,
    pub observation_source: ObservationSource,
    /// Accept a call whose API response equals the gold call's response.
    pub response_equivalence: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            model_retry: RetryPolicy::default(),
            tool_retry: RetryPolicy::default(),
            observation_source: ObservationSource::Live,
            response_equivalence: false,
        }
    }
}

impl RunnerOptions {
    pub fn from_settings(settings: &EvalSettings) -> Self {
        Self {
            model_retry: settings.retry.model.clone(),
            tool_retry: settings.retry.tool.clone(),
            observation_source: settings.runner.observation_source,
            response_equivalence: settings.runner.response_equivalence,
        }
    }
}

/// One gold assistant turn with the observations recorded for its calls.
struct GoldTurn {
    calls: Vec<FunctionCall>,
    observations: Vec<Value>,
}

fn gold_turns(example: &Example) -> Vec<GoldTurn> {
    let conversations = &example.conversations;
    conversations
        .iter()
        .enumerate()
        .filter(|(_, turn)| turn.is_function_call_turn())
        .map(|(index, turn)| {
            let calls = turn.function_call.clone().unwrap_or_default();
            let observation = conversations
                .get(index + 1)
                .filter(|next| next.role == Role::Tool)
                .and_then(|next| next.content.clone());
            let observations = align_observations(observation, calls.len());
            GoldTurn {
                calls,
                observations,
            }
        })
        .collect()
}

/// Splits a gold tool turn into one observation per call.
fn align_observations(observation: Option<Value>, call_count: usize) -> Vec<Value> {
    match observation {
        Some(Value::Array(items)) if items.len() == call_count => items,
        Some(single) if call_count == 1 => vec![single],
        Some(shared) => vec![shared; call_count],
        None => vec![json!({"error": "no recorded observation"}); call_count],
    }
}

/// Calls emitted in one model turn, with their scoring.
struct CallBatch {
    ids: Vec<String>,
    calls: Vec<FunctionCall>,
    /// Index into the current gold turn's calls, for matched calls.
    matched: Vec<Option<usize>>,
    /// Observations already obtained while checking response equivalence.
    prefetched: Vec<Option<Value>>,
}

enum Step {
    AwaitingModelTurn,
    ModelResponded(LLMResponse),
    ExecutingCalls(CallBatch),
    Terminal(TerminalState, Option<TerminalMessage>),
}

impl Step {
    fn phase(&self) -> RunnerState {
        match self {
            Step::AwaitingModelTurn => RunnerState::AwaitingModelTurn,
            Step::ModelResponded(_) => RunnerState::ModelResponded,
            Step::ExecutingCalls(_) => RunnerState::ExecutingCalls,
            Step::Terminal(state, _) => RunnerState::Terminal(*state),
        }
    }
}

struct RunState {
    conversation: Vec<Turn>,
    messages: Vec<Message>,
    turn_id: usize,
    correct_count: usize,
    real_turn_num: usize,
    /// Unmatched call indices of the current gold turn.
    remaining: Vec<usize>,
}

impl RunState {
    fn seed(example: &Example, gold: &[GoldTurn]) -> Self {
        let leading = example.leading_turns();
        Self {
            conversation: leading.to_vec(),
            messages: leading.iter().map(Message::from_turn).collect(),
            turn_id: 0,
            correct_count: 0,
            real_turn_num: 0,
            remaining: gold
                .first()
                .map(|turn| (0..turn.calls.len()).collect())
                .unwrap_or_default(),
        }
    }

    fn finish(
        self,
        gold: &[GoldTurn],
        state: TerminalState,
        message: Option<TerminalMessage>,
    ) -> RunOutcome {
        let counts = CountDict {
            success_turn_num: self.turn_id,
            total_turn_num: gold.len(),
            correct_call_num: self.correct_count,
            total_call_num: gold.iter().map(|turn| turn.calls.len()).sum(),
            real_turn_num: self.real_turn_num,
        };
        RunOutcome {
            generated_conversation: self.conversation,
            message,
            turn_id: self.turn_id,
            correct_count: self.correct_count,
            state,
            counts,
        }
    }
}

fn mismatch(error_type: ErrorType, content: impl Into<String>) -> Step {
    Step::Terminal(
        TerminalState::Mismatch,
        Some(TerminalMessage::new(error_type, content)),
    )
}

fn unknown_error(content: impl Into<String>) -> Step {
    Step::Terminal(
        TerminalState::Error,
        Some(TerminalMessage::new(ErrorType::UnknownError, content)),
    )
}

fn observation_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Drives any [`LLM`] through the benchmark's function-calling protocol.
pub struct FunctionCallRunner {
    llm: Arc<dyn LLM>,
    tools: Arc<dyn ToolInvoker>,
    options: RunnerOptions,
    log: Arc<ExampleLog>,
}

impl FunctionCallRunner {
    pub fn new(llm: Arc<dyn LLM>, tools: Arc<dyn ToolInvoker>, options: RunnerOptions) -> Self {
        Self {
            llm,
            tools,
            options,
            log: Arc::new(ExampleLog::disabled("runner")),
        }
    }

    pub fn with_log(mut self, log: Arc<ExampleLog>) -> Self {
        self.log = log;
        self
    }

    async fn request_turn(&self, run: &RunState, offered: &[ToolMetadata]) -> Step {
        let llm = &self.llm;
        let messages = &run.messages;
        let response = self
            .options
            .model_retry
            .attempt("model turn", || async move {
                let response = llm
                    .generate(messages.clone(), Some(offered.to_vec()))
                    .await?;
                let has_calls = response.tool_calls.as_ref().is_some_and(|c| !c.is_empty());
                let has_text = response
                    .content
                    .as_deref()
                    .is_some_and(|text| !text.trim().is_empty());
                if has_calls || has_text {
                    Ok(response)
                } else {
                    Err(EvalError::ModelError("empty model response".to_string()))
                }
            })
            .await;

        match response {
            Some(response) => Step::ModelResponded(response),
            None => {
                self.log.error(format!(
                    "model gave no usable response after {} attempts",
                    self.options.model_retry.max_attempts
                ));
                unknown_error("model returned no response")
            }
        }
    }

    async fn handle_response(
        &self,
        run: &mut RunState,
        gold: &[GoldTurn],
        response: LLMResponse,
    ) -> Step {
        let tool_calls: Vec<ToolCall> = response.tool_calls.clone().unwrap_or_default();

        if tool_calls.is_empty() {
            let text = response.content.unwrap_or_default();
            self.log.info(format!("model answered in text: {}", text));
            run.messages.push(Message {
                role: Role::Assistant,
                content: text.clone(),
                tool_call_id: None,
                tool_calls: None,
            });
            run.conversation.push(Turn::assistant_text(text));
            return if run.turn_id < gold.len() {
                mismatch(
                    ErrorType::EarlyStop,
                    format!(
                        "model answered with {} of {} gold turns matched",
                        run.turn_id,
                        gold.len()
                    ),
                )
            } else {
                Step::Terminal(TerminalState::Success, None)
            };
        }

        run.real_turn_num += 1;
        let tool_calls: Vec<ToolCall> = tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: Some(call.id.unwrap_or_else(|| {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                })),
                ..call
            })
            .collect();
        let calls: Vec<FunctionCall> = tool_calls.iter().map(ToolCall::to_function_call).collect();
        let ids: Vec<String> = tool_calls
            .iter()
            .map(|call| call.id.clone().unwrap_or_default())
            .collect();

        self.log.info(format!(
            "model called {}",
            serde_json::to_string(&calls).unwrap_or_default()
        ));
        run.messages.push(Message {
            role: Role::Assistant,
            content: response.content.unwrap_or_default(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        });
        run.conversation.push(Turn::assistant_calls(calls.clone()));

        let Some(gold_turn) = gold.get(run.turn_id) else {
            return mismatch(
                ErrorType::FuncHallucination,
                format!(
                    "{} function calls after all {} gold turns were matched",
                    calls.len(),
                    gold.len()
                ),
            );
        };

        if let Some(bad) = calls.iter().find(|call| call.arguments_object().is_none()) {
            return mismatch(
                ErrorType::DecodeError,
                format!("arguments of '{}' are not a JSON object: {}", bad.name, bad.arguments),
            );
        }

        let mut matched: Vec<Option<usize>> = Vec::with_capacity(calls.len());
        for call in &calls {
            let position = run
                .remaining
                .iter()
                .position(|&index| gold_turn.calls[index].matches(call));
            matched.push(position.map(|position| run.remaining.remove(position)));
        }

        let mut prefetched: Vec<Option<Value>> = vec![None; calls.len()];
        if self.options.response_equivalence
            && self.options.observation_source == ObservationSource::Live
        {
            for (slot, call) in calls.iter().enumerate() {
                if matched[slot].is_some() {
                    continue;
                }
                let Some(position) = run
                    .remaining
                    .iter()
                    .position(|&index| gold_turn.calls[index].name == call.name)
                else {
                    continue;
                };
                let gold_call = &gold_turn.calls[run.remaining[position]];
                let Some(emitted) = self.invoke(call).await else {
                    continue;
                };
                let expected = self.invoke(gold_call).await;
                if expected.is_some_and(|expected| responses_equal(&emitted, &expected)) {
                    self.log.info(format!(
                        "'{}' accepted by response equivalence",
                        call.name
                    ));
                    matched[slot] = Some(run.remaining.remove(position));
                }
                prefetched[slot] = Some(emitted);
            }
        }

        let matched_count = matched.iter().filter(|m| m.is_some()).count();
        if matched_count == 0 {
            let expected: Vec<&str> = run
                .remaining
                .iter()
                .map(|&index| gold_turn.calls[index].name.as_str())
                .collect();
            let emitted: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
            let error_type = if emitted.iter().any(|name| expected.contains(name)) {
                ErrorType::ValueError
            } else {
                ErrorType::NameError
            };
            return mismatch(
                error_type,
                format!(
                    "gold turn {}: expected {:?}, got {:?}",
                    run.turn_id + 1,
                    expected,
                    emitted
                ),
            );
        }

        run.correct_count += matched_count;
        Step::ExecutingCalls(CallBatch {
            ids,
            calls,
            matched,
            prefetched,
        })
    }

    async fn execute_calls(&self, run: &mut RunState, gold: &[GoldTurn], batch: CallBatch) -> Step {
        let gold_turn = &gold[run.turn_id];
        let mut observations = Vec::with_capacity(batch.calls.len());

        for (slot, call) in batch.calls.iter().enumerate() {
            let observation = match (&batch.prefetched[slot], self.options.observation_source) {
                (Some(value), _) => value.clone(),
                (None, ObservationSource::Live) => match self.invoke(call).await {
                    Some(value) => value,
                    None => {
                        return unknown_error(format!(
                            "tool '{}' unreachable after {} attempts",
                            call.name, self.options.tool_retry.max_attempts
                        ))
                    }
                },
                (None, ObservationSource::Gold) => match batch.matched[slot] {
                    Some(index) => gold_turn.observations[index].clone(),
                    None => json!({
                        "error": format!("no recorded observation for call '{}'", call.name)
                    }),
                },
            };
            self.log.debug(format!("{} returned {}", call.name, observation));
            run.messages.push(Message {
                role: Role::Tool,
                content: observation_text(&observation),
                tool_call_id: Some(batch.ids[slot].clone()),
                tool_calls: None,
            });
            observations.push(observation);
        }
        run.conversation.push(Turn::tool(Value::Array(observations)));

        if run.remaining.is_empty() {
            run.turn_id += 1;
            run.remaining = gold
                .get(run.turn_id)
                .map(|turn| (0..turn.calls.len()).collect())
                .unwrap_or_default();
            self.log.info(format!("gold turn {} matched", run.turn_id));
        }
        Step::AwaitingModelTurn
    }

    /// Executes one call under the tool retry policy. Rejections come back
    /// as error observations; `None` means the tool stayed unreachable.
    async fn invoke(&self, call: &FunctionCall) -> Option<Value> {
        let tools = &self.tools;
        let name = call.name.as_str();
        let arguments = &call.arguments;
        let label = format!("tool {}", name);
        let result = self
            .options
            .tool_retry
            .attempt(&label, || async move {
                match tools.call(name, arguments).await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) if e.is_transient() => Err(e),
                    Err(e) => Ok(Err::<Value, ToolError>(e)),
                }
            })
            .await?;

        Some(result.unwrap_or_else(|e| {
            self.log.warn(format!("{}", e));
            e.to_observation()
        }))
    }
}

#[async_trait]
impl ModelRunner for FunctionCallRunner {
    async fn run(&self, example: &Example) -> RunOutcome {
        let gold = gold_turns(example);
        let offered = example.offered_tools();
        let mut run = RunState::seed(example, &gold);
        self.log.info(format!(
            "starting example {} with {} gold turns",
            example.id,
            gold.len()
        ));

        let mut step = Step::AwaitingModelTurn;
        loop {
            log::trace!("[{}] {:?}", example.id, step.phase());
            step = match step {
                Step::AwaitingModelTurn => self.request_turn(&run, &offered).await,
                Step::ModelResponded(response) => {
                    self.handle_response(&mut run, &gold, response).await
                }
                Step::ExecutingCalls(batch) => self.execute_calls(&mut run, &gold, batch).await,
                Step::Terminal(state, message) => {
                    if let Some(message) = &message {
                        self.log.warn(format!(
                            "terminal {:?}: {:?} {}",
                            state, message.error_type, message.content
                        ));
                    }
                    let outcome = run.finish(&gold, state, message);
                    self.log.info(format!("counts {:?}", outcome.counts));
                    return outcome;
                }
            };
        }
    }
}
