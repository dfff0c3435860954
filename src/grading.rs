use serde::Deserialize;
use tracing::{debug, error, info};

use crate::errors::GradingError;
use crate::llm_providers::{JsonResponseParser, LLMProvider};
use crate::models::{Judgment, Question, QuestionType, Submission};

/// Collapse internal whitespace and lowercase, so "  New   York" equals "new york"
pub fn normalize_answer(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Deserialize)]
struct EssayJudgment {
    #[serde(alias = "is_correct")]
    correct: bool,
    feedback: String,
}

/// Parse the model's `{"correct": bool, "feedback": str}` verdict
pub fn parse_essay_judgment(response_text: &str) -> Result<Judgment, GradingError> {
    if response_text.trim().is_empty() {
        return Err(GradingError::EmptyResponse);
    }

    let judgment: EssayJudgment = JsonResponseParser
        .parse_json_response(response_text)
        .map_err(|e| GradingError::Malformed(e.to_string()))?;

    Ok(Judgment {
        is_correct: judgment.correct,
        feedback: Some(judgment.feedback.trim().to_string()),
    })
}

/// Deterministic comparison of a chosen option against the stored answer
pub fn grade_quiz(question: &Question, answer: &str) -> Judgment {
    let is_correct = normalize_answer(answer) == normalize_answer(&question.answer);
    let feedback = if is_correct {
        "Correct!".to_string()
    } else {
        format!("Incorrect. The correct answer is: {}", question.answer)
    };

    Judgment {
        is_correct,
        feedback: Some(feedback),
    }
}

fn build_essay_prompt(question: &Question, answer: &str) -> String {
    format!(
        r#"Grade the following essay answer based on conceptual accuracy, not exact wording.

Question: {}
Reference Answer: {}
Student's Answer: {}

The answer is correct if it covers the key points of the reference answer without significant errors.
Accept paraphrasing and different valid explanations.

Please respond with a JSON object in this exact format:
{{
    "correct": true|false,
    "feedback": "Specific feedback on what was right, what was missing and how to improve"
}}"#,
        question.question, question.answer, answer
    )
}

/// Judges submissions. Never persists anything.
#[derive(Clone)]
pub struct GradingEngine {
    provider: LLMProvider,
}

impl GradingEngine {
    pub fn new(provider: LLMProvider) -> Self {
        Self { provider }
    }

    pub async fn grade(&self, question: &Question, submission: &Submission) -> Result<Judgment, GradingError> {
        match (question.kind, submission) {
            (QuestionType::Flashcard, Submission::SelfAssessment(knew_it)) => Ok(Judgment {
                is_correct: *knew_it,
                feedback: None,
            }),
            (QuestionType::Flashcard, Submission::Answer(_)) => Err(GradingError::InvalidSubmission(
                "flashcards are graded by self-assessment".to_string(),
            )),
            (kind, Submission::SelfAssessment(_)) => Err(GradingError::InvalidSubmission(format!(
                "{} questions need a written answer",
                kind
            ))),
            (_, Submission::Answer(answer)) if answer.trim().is_empty() => Err(
                GradingError::InvalidSubmission("answer must not be blank".to_string()),
            ),
            (QuestionType::Quiz, Submission::Answer(answer)) => {
                let judgment = grade_quiz(question, answer);
                debug!(question_id = question.id, is_correct = judgment.is_correct, "Graded quiz answer");
                Ok(judgment)
            }
            (QuestionType::Essay, Submission::Answer(answer)) => self.grade_essay(question, answer).await,
        }
    }

    async fn grade_essay(&self, question: &Question, answer: &str) -> Result<Judgment, GradingError> {
        info!(
            question_id = question.id,
            answer_length = answer.len(),
            "Grading essay answer"
        );

        let system_message = "You are an expert teacher focused on fair, understanding-based grading. \
Always respond with valid JSON in the requested format.";
        let prompt = build_essay_prompt(question, answer);
        let response_text = self.provider.make_request(Some(system_message), &prompt).await?;
        debug!(question_id = question.id, response_content = %response_text, "Raw LLM response for essay grading");

        match parse_essay_judgment(&response_text) {
            Ok(judgment) => {
                info!(
                    question_id = question.id,
                    is_correct = judgment.is_correct,
                    "Successfully graded essay answer"
                );
                Ok(judgment)
            }
            Err(e) => {
                error!(
                    question_id = question.id,
                    error = %e,
                    json_content = %JsonResponseParser::extract_json_from_response(&response_text),
                    "Failed to parse essay grading response"
                );
                Err(e)
            }
        }
    }
}
