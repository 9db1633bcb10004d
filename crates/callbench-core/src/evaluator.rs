//! Response evaluation
//!
//! Grades the free-text answer that closes a generated conversation. The
//! default evaluator is an LLM judge that scores completeness and
//! correctness against the gold conversation's final answer.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::core_types::{Example, Message};
use crate::errors::EvalError;
use crate::llm::LLM;
use crate::retry::RetryPolicy;

#[async_trait]
pub trait ResponseEvaluator: Send + Sync {
    /// Returns `None` when no judgment could be produced.
    async fn score(&self, example: &Example, generated: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgement {
    pub score: u8,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RespEval {
    pub complete: Judgement,
    pub correct: Judgement,
}

const JUDGE_SYSTEM: &str = r#"You are grading the final answer of an assistant that used tools to help a user.

Compare the assistant's answer to the reference answer and score it on two aspects:
- complete: does the answer address every part of the user's request? 0 = not at all, 1 = partially, 2 = fully.
- correct: is the information in the answer consistent with the reference answer? 0 = wrong, 1 = partially correct, 2 = correct.

Reply with JSON only, in this exact shape:
{"complete": {"score": <0-2>, "reason": "<short reason>"}, "correct": {"score": <0-2>, "reason": "<short reason>"}}"#;

fn json_object() -> &'static Regex {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    JSON_OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid judge reply regex"))
}

pub struct LlmJudge {
    llm: Arc<dyn LLM>,
    retry: RetryPolicy,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LLM>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    fn build_prompt(query: &str, reference: &str, generated: &str) -> String {
        format!(
            "User request:\n{}\n\nReference answer:\n{}\n\nAssistant answer:\n{}",
            query, reference, generated
        )
    }

    /// Extracts the judgment from a reply that may wrap the JSON in prose
    /// or a code fence.
    pub fn parse_reply(reply: &str) -> Result<RespEval, EvalError> {
        let json = json_object()
            .find(reply)
            .map(|m| m.as_str())
            .ok_or_else(|| EvalError::ParsingError("No JSON object in judge reply".to_string()))?;
        let eval: RespEval = serde_json::from_str(json)?;
        if eval.complete.score > 2 || eval.correct.score > 2 {
            return Err(EvalError::ParsingError(format!(
                "Judge scores out of range: {}/{}",
                eval.complete.score, eval.correct.score
            )));
        }
        Ok(eval)
    }
}

#[async_trait]
impl ResponseEvaluator for LlmJudge {
    async fn score(&self, example: &Example, generated: &str) -> Option<Value> {
        let Some(reference) = example.reference_answer() else {
            log::warn!("Example {} has no reference answer to judge against", example.id);
            return None;
        };
        let prompt = Self::build_prompt(example.query().unwrap_or_default(), reference, generated);
        let llm = &self.llm;
        let prompt = prompt.as_str();

        let eval = self
            .retry
            .attempt("response judge", || async move {
                let response = llm
                    .generate(vec![Message::system(JUDGE_SYSTEM), Message::user(prompt)], None)
                    .await?;
                let reply = response.content.ok_or_else(|| {
                    EvalError::ParsingError("Judge reply has no content".to_string())
                })?;
                Self::parse_reply(&reply)
            })
            .await?;

        serde_json::to_value(eval).ok()
    }
}
