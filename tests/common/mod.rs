#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::json;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use study_forge::{
    ContentExtractor, DataAccessError, Database, DocumentStore, GradingEngine, LLMProviderFactory,
    LLMProviderType, NewQuestion, QuestionGenerator, QuestionType, StoredDocument, StudyService,
};
use zip::write::SimpleFileOptions;

pub const OPENAI_PATH: &str = "/chat/completions";

/// Wrap model output in an OpenAI chat completion envelope
pub fn openai_body(content: &str) -> String {
    json!({
        "choices": [
            {"message": {"role": "assistant", "content": content}}
        ]
    })
    .to_string()
}

pub fn gemini_body(content: &str) -> String {
    json!({
        "candidates": [
            {"content": {"parts": [{"text": content}]}}
        ]
    })
    .to_string()
}

pub fn three_question_response() -> String {
    json!({
        "questions": [
            {"type": "flashcard", "question": "What do plants absorb for photosynthesis?", "answer": "Light, water and carbon dioxide"},
            {"type": "quiz", "question": "Where does photosynthesis happen?", "options": ["Mitochondria", "Chloroplast", "Nucleus"], "answer": "Chloroplast"},
            {"type": "essay", "question": "Explain why photosynthesis matters for life on Earth.", "answer": "Oxygen production, base of food chains"}
        ]
    })
    .to_string()
}

/// Document store that keeps uploads in memory
#[derive(Default)]
pub struct RecordingStore {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn put(
        &self,
        object_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredDocument, DataAccessError> {
        if self.fail {
            return Err(DataAccessError::Storage("bucket unavailable".to_string()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((object_name.to_string(), content_type.to_string(), bytes.len()));
        Ok(StoredDocument {
            file_name: object_name.to_string(),
            url: format!("memory://documents/{}", object_name),
        })
    }
}

pub async fn study_service(llm_url: &str, store: Arc<dyn DocumentStore>) -> StudyService {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let provider = LLMProviderFactory::create_provider(
        LLMProviderType::OpenAI,
        "test-key".to_string(),
        Some(llm_url.to_string()),
        None,
        Duration::from_secs(5),
    )
    .unwrap();

    StudyService::new(
        db,
        store,
        ContentExtractor::new(1024 * 1024),
        QuestionGenerator::new(provider.clone()),
        GradingEngine::new(provider),
    )
}

pub fn question(topic: &str, kind: QuestionType, text: &str, answer: &str) -> NewQuestion {
    NewQuestion {
        topic: topic.to_string(),
        kind,
        question: text.to_string(),
        answer: answer.to_string(),
        options: match kind {
            QuestionType::Quiz => Some(vec!["Paris".to_string(), "Lyon".to_string(), "Nice".to_string()]),
            _ => None,
        },
    }
}

/// One flashcard, one quiz and one essay about France
pub async fn seed_geography(db: &Database) -> (i64, i64, i64) {
    let saved = db
        .insert_questions(&[
            question("Geography", QuestionType::Flashcard, "Longest river in France?", "Loire"),
            question("Geography", QuestionType::Quiz, "Capital of France?", "paris"),
            question(
                "Geography",
                QuestionType::Essay,
                "Describe the climate of southern France.",
                "Mediterranean: hot dry summers, mild wet winters",
            ),
        ])
        .await
        .unwrap();
    (saved[0].id, saved[1].id, saved[2].id)
}

fn slide_xml(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<a:p><a:r><a:rPr lang=\"en-US\"/><a:t>{}</a:t></a:r></a:p>", p))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody><a:bodyPr/>{}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
        body
    )
}

/// Minimal PPTX: one slide per entry, each a list of paragraphs
pub fn build_pptx(slides: &[&[&str]]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("[Content_Types].xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"<Types/>").unwrap();
    writer
        .start_file("ppt/presentation.xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"<p:presentation/>").unwrap();

    for (index, paragraphs) in slides.iter().enumerate() {
        writer
            .start_file(format!("ppt/slides/slide{}.xml", index + 1), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(slide_xml(paragraphs).as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Single-page PDF with one line of Courier text
pub fn build_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
