//! Persisted result records and the outcome values they are built from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core_types::Turn;

/// Why a conversation stopped before (or instead of) a clean finish.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Function calls emitted after the gold trace was exhausted.
    FuncHallucination,
    /// No emitted call name matches a remaining gold call.
    NameError,
    /// Names match but no argument set does.
    ValueError,
    /// Arguments that are not a JSON object.
    DecodeError,
    /// Free-text answer while gold calls remain.
    EarlyStop,
    /// The example could not be scored at all.
    UnknownError,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TerminalMessage {
    pub error_type: ErrorType,
    pub content: String,
}

impl TerminalMessage {
    pub fn new(error_type: ErrorType, content: impl Into<String>) -> Self {
        Self {
            error_type,
            content: content.into(),
        }
    }
}

/// Correctness counters for one example. Built once when the conversation
/// reaches a terminal state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountDict {
    pub success_turn_num: usize,
    pub total_turn_num: usize,
    pub correct_call_num: usize,
    pub total_call_num: usize,
    pub real_turn_num: usize,
}

impl CountDict {
    /// Every gold turn matched.
    pub fn all_turns_matched(&self) -> bool {
        self.success_turn_num == self.total_turn_num
    }
}

/// One line of the checkpoint file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResultRecord {
    pub id: String,
    pub gen_convs: Vec<Turn>,
    pub message: Option<TerminalMessage>,
    pub count_dict: CountDict,
    pub resp_eval: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_shape() {
        let record = ResultRecord {
            id: "ex1".to_string(),
            gen_convs: vec![Turn::user("hi")],
            message: Some(TerminalMessage::new(ErrorType::ValueError, "bad args")),
            count_dict: CountDict {
                success_turn_num: 0,
                total_turn_num: 1,
                correct_call_num: 0,
                total_call_num: 1,
                real_turn_num: 1,
            },
            resp_eval: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["message"]["error_type"], "value_error");
        assert_eq!(value["count_dict"]["total_call_num"], 1);
        assert_eq!(value["resp_eval"], json!(null));
        assert_eq!(value["gen_convs"][0]["role"], "user");
    }
}
