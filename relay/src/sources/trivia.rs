use crate::sources::success_body;
use crate::traits::Source;
use crate::types::{CandidateItem, RelayError, Result};
use crate::utils::decode_html_entities;
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

const TRIVIA_API_URL: &str = "https://opentdb.com/api.php";
const MAX_OPTIONS: usize = 4;

/// Multiple-choice questions from the Open Trivia Database
pub struct TriviaSource {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TriviaResponse {
    response_code: u8,
    #[serde(default)]
    results: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct Question {
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

impl TriviaSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: TRIVIA_API_URL.to_string(),
        }
    }

    pub fn parse_questions(&self, body: &str) -> Result<Vec<CandidateItem>> {
        let response: TriviaResponse = serde_json::from_str(body).map_err(|e| {
            RelayError::source_failure(self.source_id(), format!("bad response: {}", e))
        })?;

        if response.response_code != 0 {
            return Err(RelayError::source_failure(
                self.source_id(),
                format!("trivia API answered with code {}", response.response_code),
            ));
        }

        let fetched_at = Utc::now();
        let mut rng = rand::thread_rng();
        let candidates = response
            .results
            .into_iter()
            .map(|question| {
                let text = decode_html_entities(&question.question);
                let mut options: Vec<String> = question
                    .incorrect_answers
                    .iter()
                    .chain(std::iter::once(&question.correct_answer))
                    .map(|option| decode_html_entities(option))
                    .collect();
                options.shuffle(&mut rng);

                let payload = question_payload(&text, &options);
                CandidateItem::new(text, payload, fetched_at)
            })
            .collect();

        Ok(candidates)
    }
}

/// Question text followed by up to four numbered options
pub fn question_payload(question: &str, options: &[String]) -> String {
    let numbered: Vec<String> = options
        .iter()
        .take(MAX_OPTIONS)
        .enumerate()
        .map(|(i, option)| format!("{}) {}", i + 1, option))
        .collect();
    format!("{}\n\n{}", question, numbered.join("\n"))
}

#[async_trait]
impl Source for TriviaSource {
    fn source_id(&self) -> String {
        "trivia".to_string()
    }

    fn source_name(&self) -> String {
        "Open Trivia DB".to_string()
    }

    async fn fetch_candidates(&self, max: usize) -> Result<Vec<CandidateItem>> {
        let amount = max.clamp(1, 50).to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("amount", amount.as_str()), ("type", "multiple")])
            .send()
            .await
            .map_err(|e| RelayError::source_failure(self.source_id(), e))?;

        let body = success_body(&self.source_id(), response).await?;
        let candidates = self.parse_questions(&body)?;

        info!("Pulled {} trivia questions", candidates.len());
        Ok(candidates)
    }
}
