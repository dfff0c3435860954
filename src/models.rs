use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Flashcard,
    Quiz,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Flashcard => "flashcard",
            QuestionType::Quiz => "quiz",
            QuestionType::Essay => "essay",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flashcard" => Ok(QuestionType::Flashcard),
            "quiz" => Ok(QuestionType::Quiz),
            "essay" => Ok(QuestionType::Essay),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>, // quiz only
    pub created_at: DateTime<Utc>,
}

/// A validated question that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestion {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub username: String,
    pub question_id: i64,
    pub is_correct: bool,
    pub user_answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttempt {
    pub username: String,
    pub question_id: i64,
    pub is_correct: bool,
    pub user_answer: String,
}

/// An attempt joined with the question it answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: Attempt,
    pub question: Question,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    SlideDeck,
}

pub const PDF_MIME: &str = "application/pdf";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

impl DocumentFormat {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_lowercase();

        match extension.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "pptx" => Some(DocumentFormat::SlideDeck),
            _ => None,
        }
    }

    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            PDF_MIME => Some(DocumentFormat::Pdf),
            PPTX_MIME => Some(DocumentFormat::SlideDeck),
            _ => None,
        }
    }

    /// The extension wins over the declared MIME type, which browsers often
    /// report as `application/octet-stream`.
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Option<Self> {
        Self::from_file_name(file_name).or_else(|| content_type.and_then(Self::from_mime))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::SlideDeck => "pptx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => PDF_MIME,
            DocumentFormat::SlideDeck => PPTX_MIME,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Pdf => f.write_str("PDF"),
            DocumentFormat::SlideDeck => f.write_str("slide deck"),
        }
    }
}

/// Raw upload as received from the caller
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub file_name: String,
    pub url: String,
}

pub const MAX_QUESTIONS_PER_TYPE: u32 = 20;

/// How many questions of each type to ask the model for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMix {
    #[serde(default)]
    pub flashcards: u32,
    #[serde(default)]
    pub quiz: u32,
    #[serde(default)]
    pub essay: u32,
}

impl Default for QuestionMix {
    fn default() -> Self {
        Self {
            flashcards: 5,
            quiz: 5,
            essay: 3,
        }
    }
}

impl QuestionMix {
    pub fn total(&self) -> u32 {
        self.flashcards + self.quiz + self.essay
    }

    pub fn validate(&self) -> Result<(), String> {
        for (label, count) in [
            ("flashcards", self.flashcards),
            ("quiz", self.quiz),
            ("essay", self.essay),
        ] {
            if count > MAX_QUESTIONS_PER_TYPE {
                return Err(format!(
                    "{} count {} exceeds the maximum of {}",
                    label, count, MAX_QUESTIONS_PER_TYPE
                ));
            }
        }
        if self.total() == 0 {
            return Err("at least one question must be requested".to_string());
        }
        Ok(())
    }
}

/// What the user handed in for a question
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    SelfAssessment(bool),
    Answer(String),
}

impl Submission {
    /// Text recorded in the attempt log
    pub fn recorded_answer(&self) -> String {
        match self {
            Submission::SelfAssessment(true) => "self-assessed: knew it".to_string(),
            Submission::SelfAssessment(false) => "self-assessed: did not know".to_string(),
            Submission::Answer(answer) => answer.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub is_correct: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedAttempt {
    pub attempt: Attempt,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopicProgress {
    pub attempted: u32,
    pub correct: u32,
    pub accuracy: Option<f64>, // None when nothing was attempted
}

impl TopicProgress {
    pub fn new(attempted: u32, correct: u32) -> Self {
        let accuracy = if attempted == 0 {
            None
        } else {
            Some(correct as f64 / attempted as f64)
        };
        Self {
            attempted,
            correct,
            accuracy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub username: String,
    pub overall: TopicProgress,
    pub topics: BTreeMap<String, TopicProgress>,
    pub review: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub topic: String,
    pub question_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub topic: Option<String>,
    pub kind: Option<QuestionType>,
    /// Restrict to this user's review list
    pub review_for: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub topic: String,
    pub documents: Vec<StoredDocument>,
    pub questions: Vec<Question>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_format_detection() {
        assert_eq!(DocumentFormat::detect("notes.PDF", None), Some(DocumentFormat::Pdf));
        assert_eq!(
            DocumentFormat::detect("deck.pptx", Some("application/octet-stream")),
            Some(DocumentFormat::SlideDeck)
        );
        assert_eq!(
            DocumentFormat::detect("upload", Some("application/pdf; charset=binary")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::detect("essay.docx", Some("text/plain")), None);
        assert_eq!(DocumentFormat::detect("README", None), None);
    }

    #[test]
    fn test_question_mix_validation() {
        assert!(QuestionMix::default().validate().is_ok());
        assert_eq!(QuestionMix::default().total(), 13);

        let empty = QuestionMix {
            flashcards: 0,
            quiz: 0,
            essay: 0,
        };
        assert!(empty.validate().is_err());

        let too_many = QuestionMix {
            flashcards: 21,
            quiz: 0,
            essay: 0,
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_topic_progress_accuracy() {
        assert_eq!(TopicProgress::new(0, 0).accuracy, None);
        assert_eq!(TopicProgress::new(4, 3).accuracy, Some(0.75));
    }

    #[test]
    fn test_question_type_round_trip_names() {
        for kind in [QuestionType::Flashcard, QuestionType::Quiz, QuestionType::Essay] {
            assert_eq!(kind.as_str().parse::<QuestionType>(), Ok(kind));
        }
        assert!("true_false".parse::<QuestionType>().is_err());
    }
}
