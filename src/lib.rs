pub mod api;
pub mod config;
pub mod database;
pub mod document_store;
pub mod errors;
pub mod extractor;
pub mod grading;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod progress;
pub mod question_generator;
pub mod study_service;

pub use config::Config;
pub use database::Database;
pub use document_store::{DocumentStore, HttpDocumentStore};
pub use errors::*;
pub use extractor::ContentExtractor;
pub use grading::GradingEngine;
pub use llm_providers::{JsonResponseParser, LLMProvider, LLMProviderFactory, LLMProviderType};
pub use models::*;
pub use question_generator::QuestionGenerator;
pub use study_service::StudyService;
