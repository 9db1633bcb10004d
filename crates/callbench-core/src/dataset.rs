//! Input dataset loading.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::path::Path;

use crate::core_types::Example;
use crate::errors::EvalError;

/// Loads examples from a JSON Lines file or a file holding one JSON array.
pub fn load_examples(path: &Path) -> Result<Vec<Example>, EvalError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EvalError::DatasetError(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_examples(&content)
        .map_err(|e| EvalError::DatasetError(format!("{}: {}", path.display(), e)))
}

pub fn parse_examples(content: &str) -> Result<Vec<Example>, EvalError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| EvalError::DatasetError(format!("invalid JSON array: {}", e)));
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            serde_json::from_str::<Example>(line).map_err(|e| {
                EvalError::DatasetError(format!("line {}: {}", line_no + 1, e))
            })
        })
        .collect()
}

/// A random subset of at most `count` examples.
pub fn sample_examples(examples: Vec<Example>, count: usize) -> Vec<Example> {
    if examples.len() <= count {
        return examples;
    }
    let mut rng = rand::thread_rng();
    examples
        .choose_multiple(&mut rng, count)
        .cloned()
        .collect()
}

/// Keeps the first example for each id. Returns the kept examples and the
/// number of duplicates removed.
pub fn dedupe_by_id(examples: Vec<Example>) -> (Vec<Example>, usize) {
    let mut seen = HashSet::new();
    let before = examples.len();
    let kept: Vec<Example> = examples
        .into_iter()
        .filter(|example| seen.insert(example.id.clone()))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINE_A: &str = r#"{"id": "a", "conversations": [{"role": "user", "content": "q1"}]}"#;
    const LINE_B: &str = r#"{"id": "b", "conversations": [{"role": "user", "content": "q2"}]}"#;

    #[test]
    fn test_jsonl_and_array_forms() {
        let jsonl = format!("{}\n\n{}\n", LINE_A, LINE_B);
        assert_eq!(parse_examples(&jsonl).unwrap().len(), 2);

        let array = format!("[{}, {}]", LINE_A, LINE_B);
        let examples = parse_examples(&array).unwrap();
        assert_eq!(examples[1].id, "b");
    }

    #[test]
    fn test_bad_line_reports_position() {
        let content = format!("{}\nnot json\n", LINE_A);
        match parse_examples(&content) {
            Err(EvalError::DatasetError(msg)) => assert!(msg.contains("line 2")),
            other => panic!("expected dataset error, got {:?}", other.map(|e| e.len())),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", LINE_A).unwrap();
        assert_eq!(load_examples(file.path()).unwrap()[0].id, "a");
        assert!(load_examples(Path::new("/nonexistent/data.jsonl")).is_err());
    }

    #[test]
    fn test_sampling_and_dedupe() {
        let examples = parse_examples(&format!("{}\n{}\n{}\n", LINE_A, LINE_B, LINE_A)).unwrap();

        let (unique, removed) = dedupe_by_id(examples.clone());
        assert_eq!(removed, 1);
        assert_eq!(unique.len(), 2);

        let sampled = sample_examples(examples.clone(), 2);
        assert_eq!(sampled.len(), 2);
        assert_eq!(sample_examples(examples, 10).len(), 3);
    }
}
