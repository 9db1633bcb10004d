//! Aggregate statistics over a checkpoint file.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::record::{ErrorType, ResultRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub examples: usize,
    /// Examples whose every gold turn was matched.
    pub fully_successful: usize,
    pub correct_calls: usize,
    pub total_calls: usize,
    pub success_turns: usize,
    pub total_turns: usize,
    pub real_turns: usize,
    pub judged: usize,
    pub complete_score_sum: f64,
    pub correct_score_sum: f64,
    pub errors: BTreeMap<String, usize>,
}

impl RunReport {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let mut report = RunReport::default();
        for record in records {
            let counts = &record.count_dict;
            report.examples += 1;
            if counts.all_turns_matched() && record.message.is_none() {
                report.fully_successful += 1;
            }
            report.correct_calls += counts.correct_call_num;
            report.total_calls += counts.total_call_num;
            report.success_turns += counts.success_turn_num;
            report.total_turns += counts.total_turn_num;
            report.real_turns += counts.real_turn_num;

            if let Some(message) = &record.message {
                *report.errors.entry(error_label(message.error_type)).or_default() += 1;
            }

            if let Some(eval) = &record.resp_eval {
                let complete = eval["complete"]["score"].as_f64();
                let correct = eval["correct"]["score"].as_f64();
                if let (Some(complete), Some(correct)) = (complete, correct) {
                    report.judged += 1;
                    report.complete_score_sum += complete;
                    report.correct_score_sum += correct;
                }
            }
        }
        report
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.fully_successful, self.examples)
    }

    pub fn call_accuracy(&self) -> f64 {
        ratio(self.correct_calls, self.total_calls)
    }

    pub fn turn_accuracy(&self) -> f64 {
        ratio(self.success_turns, self.total_turns)
    }

    pub fn average_real_turns(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.real_turns as f64 / self.examples as f64
        }
    }

    pub fn mean_complete_score(&self) -> Option<f64> {
        (self.judged > 0).then(|| self.complete_score_sum / self.judged as f64)
    }

    pub fn mean_correct_score(&self) -> Option<f64> {
        (self.judged > 0).then(|| self.correct_score_sum / self.judged as f64)
    }
}

fn error_label(error_type: ErrorType) -> String {
    serde_json::to_value(error_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", error_type))
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "examples:          {}", self.examples)?;
        writeln!(
            f,
            "success rate:      {:.2}% ({}/{})",
            self.success_rate() * 100.0,
            self.fully_successful,
            self.examples
        )?;
        writeln!(
            f,
            "call accuracy:     {:.2}% ({}/{})",
            self.call_accuracy() * 100.0,
            self.correct_calls,
            self.total_calls
        )?;
        writeln!(
            f,
            "turn accuracy:     {:.2}% ({}/{})",
            self.turn_accuracy() * 100.0,
            self.success_turns,
            self.total_turns
        )?;
        writeln!(f, "avg real turns:    {:.2}", self.average_real_turns())?;
        match (self.mean_complete_score(), self.mean_correct_score()) {
            (Some(complete), Some(correct)) => writeln!(
                f,
                "judge (n={}):      complete {:.2}, correct {:.2}",
                self.judged, complete, correct
            )?,
            _ => writeln!(f, "judge:             no judged answers")?,
        }
        for (error_type, count) in &self.errors {
            writeln!(f, "  {:<18} {}", error_type, count)?;
        }
        Ok(())
    }
}
