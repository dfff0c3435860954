use std::collections::{BTreeMap, HashMap};

use crate::models::{AttemptRecord, ProgressReport, Question, TopicProgress};

/// Per-topic attempted/correct/accuracy over a user's attempts
pub fn topic_breakdown(records: &[AttemptRecord]) -> BTreeMap<String, TopicProgress> {
    let mut tallies: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for record in records {
        let tally = tallies.entry(record.question.topic.clone()).or_default();
        tally.0 += 1;
        if record.attempt.is_correct {
            tally.1 += 1;
        }
    }

    tallies
        .into_iter()
        .map(|(topic, (attempted, correct))| (topic, TopicProgress::new(attempted, correct)))
        .collect()
}

pub fn overall(records: &[AttemptRecord]) -> TopicProgress {
    let correct = records.iter().filter(|r| r.attempt.is_correct).count();
    TopicProgress::new(records.len() as u32, correct as u32)
}

/// Questions whose most recent attempt was incorrect.
///
/// "Most recent" orders by `created_at`, then by attempt id, so two attempts
/// recorded in the same microsecond still resolve deterministically.
/// The result is ordered by question id.
pub fn review_list(records: &[AttemptRecord]) -> Vec<Question> {
    let mut latest: HashMap<i64, &AttemptRecord> = HashMap::new();
    for record in records {
        let key = (record.attempt.created_at, record.attempt.id);
        latest
            .entry(record.question.id)
            .and_modify(|current| {
                if key > (current.attempt.created_at, current.attempt.id) {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut missed: Vec<Question> = latest
        .into_values()
        .filter(|record| !record.attempt.is_correct)
        .map(|record| record.question.clone())
        .collect();
    missed.sort_by_key(|question| question.id);
    missed
}

pub fn build_report(username: &str, records: &[AttemptRecord]) -> ProgressReport {
    ProgressReport {
        username: username.to_string(),
        overall: overall(records),
        topics: topic_breakdown(records),
        review: review_list(records),
    }
}
