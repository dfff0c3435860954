use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::errors::GenerationError;
use crate::grading::normalize_answer;
use crate::llm_providers::{JsonResponseParser, LLMProvider};
use crate::log_llm_operation;
use crate::models::{NewQuestion, QuestionMix, QuestionType};

/// Longest source text sent to the model, in characters
pub const MAX_SOURCE_CHARS: usize = 60_000;

/// Existing questions quoted back to the model when generating more for a topic
pub const MAX_CONTEXT_QUESTIONS: usize = 5;

const SYSTEM_MESSAGE: &str = "You are an experienced teacher who writes study material. \
Always respond with valid JSON in the requested format.";

/// One entry of the model's response, tagged by its `type` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GeneratedEntry {
    Flashcard {
        question: String,
        answer: String,
    },
    Quiz {
        question: String,
        answer: String,
        options: Vec<String>,
    },
    Essay {
        question: String,
        answer: String,
    },
}

#[derive(Clone)]
pub struct QuestionGenerator {
    provider: LLMProvider,
}

impl QuestionGenerator {
    pub fn new(provider: LLMProvider) -> Self {
        Self { provider }
    }

    /// Generate questions from extracted document text
    pub async fn generate_from_text(
        &self,
        source_text: &str,
        topic: &str,
        mix: QuestionMix,
    ) -> Result<Vec<NewQuestion>, GenerationError> {
        info!(
            topic = %topic,
            source_length = source_text.len(),
            requested = mix.total(),
            "Generating questions from document text"
        );

        let prompt = build_document_prompt(source_text, topic, mix);
        self.request_questions(&prompt, topic, mix).await
    }

    /// Generate new questions for a topic, steering away from the ones it already has
    pub async fn generate_for_topic(
        &self,
        topic: &str,
        mix: QuestionMix,
        existing_questions: &[String],
    ) -> Result<Vec<NewQuestion>, GenerationError> {
        info!(
            topic = %topic,
            context_questions = existing_questions.len().min(MAX_CONTEXT_QUESTIONS),
            requested = mix.total(),
            "Generating more questions for topic"
        );

        let prompt = build_topic_prompt(topic, mix, existing_questions);
        self.request_questions(&prompt, topic, mix).await
    }

    async fn request_questions(
        &self,
        prompt: &str,
        topic: &str,
        mix: QuestionMix,
    ) -> Result<Vec<NewQuestion>, GenerationError> {
        let response_text = self.provider.make_request(Some(SYSTEM_MESSAGE), prompt).await?;
        debug!(topic = %topic, response_content = %response_text, "Raw LLM response for question generation");

        let questions = match parse_generated_questions(&response_text, topic) {
            Ok(questions) => questions,
            Err(e) => {
                error!(
                    topic = %topic,
                    error = %e,
                    json_content = %JsonResponseParser::extract_json_from_response(&response_text),
                    "Failed to parse question generation response"
                );
                return Err(e);
            }
        };

        let produced = count_by_type(&questions);
        let requested = (mix.flashcards, mix.quiz, mix.essay);
        if produced != requested {
            log_llm_operation!(
                warn,
                "generate_questions",
                format!(
                    "requested {}/{}/{} flashcard/quiz/essay questions, model returned {}/{}/{}",
                    requested.0, requested.1, requested.2, produced.0, produced.1, produced.2
                )
            );
        }

        info!(topic = %topic, question_count = questions.len(), "Successfully generated questions");
        Ok(questions)
    }
}

fn count_by_type(questions: &[NewQuestion]) -> (u32, u32, u32) {
    questions.iter().fold((0, 0, 0), |(f, q, e), question| match question.kind {
        QuestionType::Flashcard => (f + 1, q, e),
        QuestionType::Quiz => (f, q + 1, e),
        QuestionType::Essay => (f, q, e + 1),
    })
}

fn truncate_source(text: &str) -> &str {
    match text.char_indices().nth(MAX_SOURCE_CHARS) {
        Some((cut, _)) => {
            log_llm_operation!(
                warn,
                "generate_questions",
                format!("source text truncated to {} characters", MAX_SOURCE_CHARS)
            );
            &text[..cut]
        }
        None => text,
    }
}

fn schema_instructions(mix: QuestionMix) -> String {
    format!(
        r#"Create exactly {flashcards} flashcard questions, {quiz} quiz questions and {essay} essay questions.

Respond with a JSON object in this exact format:
{{
    "questions": [
        {{"type": "flashcard", "question": "Short prompt", "answer": "Concise answer"}},
        {{"type": "quiz", "question": "Multiple choice question", "options": ["Option 1", "Option 2", "Option 3", "Option 4"], "answer": "Option 2"}},
        {{"type": "essay", "question": "Open question", "answer": "Key points a good answer covers"}}
    ]
}}

Guidelines:
- Flashcards test one fact or definition each
- Quiz questions have 4 options WITHOUT letter prefixes, and the answer is the full text of the correct option
- Essay questions ask for explanation or analysis; the answer lists what a complete response must mention
- Every question must be answerable from the material alone"#,
        flashcards = mix.flashcards,
        quiz = mix.quiz,
        essay = mix.essay,
    )
}

pub fn build_document_prompt(source_text: &str, topic: &str, mix: QuestionMix) -> String {
    format!(
        "Based on the following study material about \"{}\", write questions that test understanding of its key concepts.\n\nMaterial:\n{}\n\n{}",
        topic,
        truncate_source(source_text),
        schema_instructions(mix)
    )
}

pub fn build_topic_prompt(topic: &str, mix: QuestionMix, existing_questions: &[String]) -> String {
    let context = if existing_questions.is_empty() {
        String::new()
    } else {
        let listed = existing_questions
            .iter()
            .take(MAX_CONTEXT_QUESTIONS)
            .map(|q| format!("- {}", q))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\n\nThe topic already has these questions. Write new ones that are different:\n{}",
            listed
        )
    };

    format!(
        "Write new study questions about \"{}\".{}\n\n{}",
        topic,
        context,
        schema_instructions(mix)
    )
}

/// Parse and validate a model response into questions for `topic`.
/// Accepts `{"questions": [...]}` or a bare array, optionally inside a markdown fence.
pub fn parse_generated_questions(response_text: &str, topic: &str) -> Result<Vec<NewQuestion>, GenerationError> {
    if response_text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }

    let payload: Value = JsonResponseParser
        .parse_json_response(response_text)
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let entries = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(GenerationError::Malformed(
                    "\"questions\" is not an array".to_string(),
                ))
            }
            None => {
                return Err(GenerationError::Malformed(
                    "response has no \"questions\" field".to_string(),
                ))
            }
        },
        other => {
            return Err(GenerationError::Malformed(format!(
                "expected an object or array, got {}",
                other
            )))
        }
    };

    if entries.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let entry: GeneratedEntry = serde_json::from_value(raw)
                .map_err(|e| GenerationError::Malformed(format!("question #{}: {}", index, e)))?;
            validate_entry(index, entry, topic)
        })
        .collect()
}

fn validate_entry(index: usize, entry: GeneratedEntry, topic: &str) -> Result<NewQuestion, GenerationError> {
    let invalid = |reason: &str| GenerationError::InvalidQuestion {
        index,
        reason: reason.to_string(),
    };

    let (kind, question, answer, options) = match entry {
        GeneratedEntry::Flashcard { question, answer } => (QuestionType::Flashcard, question, answer, None),
        GeneratedEntry::Essay { question, answer } => (QuestionType::Essay, question, answer, None),
        GeneratedEntry::Quiz {
            question,
            answer,
            options,
        } => {
            let options: Vec<String> = options
                .into_iter()
                .map(|option| option.trim().to_string())
                .filter(|option| !option.is_empty())
                .collect();
            if options.len() < 2 {
                return Err(invalid("quiz question needs at least two options"));
            }
            let expected = normalize_answer(&answer);
            if !options.iter().any(|option| normalize_answer(option) == expected) {
                return Err(invalid("quiz answer does not match any option"));
            }
            (QuestionType::Quiz, question, answer, Some(options))
        }
    };

    let question = question.trim();
    let answer = answer.trim();
    if question.is_empty() {
        return Err(invalid("question text is empty"));
    }
    if answer.is_empty() {
        return Err(invalid("answer text is empty"));
    }

    Ok(NewQuestion {
        topic: topic.to_string(),
        kind,
        question: question.to_string(),
        answer: answer.to_string(),
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_response() {
        let response = r#"```json
{"questions": [
    {"type": "flashcard", "question": "Capital of France?", "answer": "Paris", "options": ["ignored"]},
    {"type": "quiz", "question": "Largest planet?", "options": ["Mars", " Jupiter ", "Venus"], "answer": "jupiter"},
    {"type": "essay", "question": "Explain tides.", "answer": "Moon gravity, Earth rotation"}
]}
```"#;

        let questions = parse_generated_questions(response, "Science").unwrap();
        assert_eq!(questions.len(), 3);
        assert!(questions.iter().all(|q| q.topic == "Science"));

        assert_eq!(questions[0].kind, QuestionType::Flashcard);
        assert_eq!(questions[0].options, None);

        assert_eq!(questions[1].kind, QuestionType::Quiz);
        assert_eq!(
            questions[1].options,
            Some(vec!["Mars".to_string(), "Jupiter".to_string(), "Venus".to_string()])
        );
        assert_eq!(questions[1].answer, "jupiter");

        assert_eq!(questions[2].kind, QuestionType::Essay);
    }

    #[test]
    fn test_parse_bare_array() {
        let response = r#"[{"type": "flashcard", "question": "H2O is?", "answer": "Water"}]"#;
        let questions = parse_generated_questions(response, "Chemistry").unwrap();
        assert_eq!(questions.len(), 1);
    }

    #[test]
    fn test_quiz_answer_must_match_an_option() {
        let response = r#"{"questions": [
            {"type": "quiz", "question": "2 + 2?", "options": ["3", "5"], "answer": "4"}
        ]}"#;
        let err = parse_generated_questions(response, "Math").unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion { index: 0, .. }));
    }

    #[test]
    fn test_quiz_needs_two_options() {
        let response = r#"{"questions": [
            {"type": "flashcard", "question": "ok", "answer": "ok"},
            {"type": "quiz", "question": "Only one?", "options": ["Yes", "  "], "answer": "Yes"}
        ]}"#;
        let err = parse_generated_questions(response, "Math").unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion { index: 1, .. }));
    }

    #[test]
    fn test_quiz_without_options_is_malformed() {
        let response = r#"{"questions": [{"type": "quiz", "question": "Where?", "answer": "Here"}]}"#;
        let err = parse_generated_questions(response, "Geo").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let response = r#"{"questions": [{"type": "true_false", "question": "Sky is blue", "answer": "true"}]}"#;
        let err = parse_generated_questions(response, "Geo").unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn test_blank_text_is_rejected() {
        let response = r#"{"questions": [{"type": "essay", "question": "  ", "answer": "Something"}]}"#;
        let err = parse_generated_questions(response, "History").unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion { .. }));
    }

    #[test]
    fn test_empty_and_non_json_responses() {
        assert!(matches!(
            parse_generated_questions("   ", "t").unwrap_err(),
            GenerationError::EmptyResponse
        ));
        assert!(matches!(
            parse_generated_questions(r#"{"questions": []}"#, "t").unwrap_err(),
            GenerationError::EmptyResponse
        ));
        assert!(matches!(
            parse_generated_questions("I cannot help with that.", "t").unwrap_err(),
            GenerationError::Malformed(_)
        ));
        assert!(matches!(
            parse_generated_questions(r#"{"items": []}"#, "t").unwrap_err(),
            GenerationError::Malformed(_)
        ));
    }

    #[test]
    fn test_long_source_is_truncated() {
        let source = "é".repeat(MAX_SOURCE_CHARS + 100);
        let prompt = build_document_prompt(&source, "Accents", QuestionMix::default());
        assert!(prompt.contains(&"é".repeat(MAX_SOURCE_CHARS)));
        assert!(!prompt.contains(&"é".repeat(MAX_SOURCE_CHARS + 1)));
        assert!(prompt.contains("exactly 5 flashcard questions, 5 quiz questions and 3 essay questions"));
    }

    #[test]
    fn test_topic_prompt_lists_at_most_five_existing_questions() {
        let existing: Vec<String> = (1..=7).map(|i| format!("Existing question {}", i)).collect();
        let prompt = build_topic_prompt("Biology", QuestionMix::default(), &existing);
        assert!(prompt.contains("- Existing question 5"));
        assert!(!prompt.contains("Existing question 6"));

        let prompt = build_topic_prompt("Biology", QuestionMix::default(), &[]);
        assert!(!prompt.contains("already has"));
    }
}
