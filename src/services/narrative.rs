use crate::models::report::{NarrativeResult, UserStats};
use crate::services::scoring;
use crate::utils::text::extract_json_object;
use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Contributors offered to the narrative scorer per run.
const NARRATIVE_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

/// Optional text-generation stage. Every failure path degrades to None;
/// the numeric pipeline never waits on this client beyond its request
/// timeout and never fails because of it.
pub struct NarrativeClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl NarrativeClient {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn generate_content(&self, api_key: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 2048,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("narrative provider error: {}", error_text));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| anyhow!("no content in narrative response"))?;

        Ok(text)
    }

    /// Scores the top contributors by activity. Returns None when the
    /// stage is unavailable for any reason (missing key, network failure,
    /// unparseable reply).
    pub async fn score_top(
        &self,
        users: &BTreeMap<String, UserStats>,
        detailed: bool,
    ) -> Option<NarrativeResult> {
        let api_key = match &self.api_key {
            Some(k) => k.clone(),
            None => {
                info!("narrative stage skipped: no API key configured");
                return None;
            }
        };

        let top = top_contributors(users, NARRATIVE_SAMPLE_SIZE);
        if top.is_empty() {
            return None;
        }

        let prompt = build_prompt(&top, detailed);
        let raw = match self.generate_content(&api_key, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("narrative stage unavailable: {}", e);
                return None;
            }
        };

        match parse_narrative(&raw) {
            Some(result) => {
                info!("narrative stage scored {} contributors", result.contributors.len());
                Some(result)
            }
            None => {
                warn!("narrative reply was not parseable, dropping the stage");
                None
            }
        }
    }
}

/// Top-N contributors by activity score, descending, ties broken by
/// identity for determinism.
pub fn top_contributors(users: &BTreeMap<String, UserStats>, n: usize) -> Vec<&UserStats> {
    let mut ranked: Vec<&UserStats> = users.values().collect();
    ranked.sort_by(|a, b| {
        b.activity_score
            .cmp(&a.activity_score)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    ranked.truncate(n);
    ranked
}

fn build_prompt(top: &[&UserStats], detailed: bool) -> String {
    let mut profile = String::new();
    for user in top {
        profile.push_str(&format!(
            "- {}: {} commits, {} PRs ({} merged), {} issues, activity score {}\n",
            user.identity,
            user.commits,
            user.pull_requests,
            user.merged_pull_requests,
            user.issues,
            user.activity_score
        ));
        if detailed {
            profile.push_str(&format!(
                "  lines: +{} / -{} / ~{}\n",
                user.lines_added, user.lines_deleted, user.lines_modified
            ));
        }
        for sample in &user.content_samples {
            profile.push_str(&format!("  {}\n", sample));
        }
    }

    let grade_fields = if detailed {
        r#", "code_quality_grade": "B+", "effort_grade": "A-""#
    } else {
        ""
    };

    format!(
        r#"You are reviewing developer activity for a weekly team report.

Contributors (top by activity):
{}

Respond ONLY with valid JSON matching this exact structure:
{{
  "summary": "one paragraph about the team's week",
  "contributors": [
    {{"identity": "login", "assessment": "two sentences", "strengths": ["..."], "areas_for_improvement": ["..."], "quality_score": 7.5{}}}
  ]
}}

Rules:
- quality_score: a number from 1 to 10
- one entry per contributor listed above
- JSON only, no markdown, no explanation"#,
        profile, grade_fields
    )
}

fn parse_narrative(raw: &str) -> Option<NarrativeResult> {
    let json = extract_json_object(raw)?;
    serde_json::from_str::<NarrativeResult>(json).ok()
}

/// Derived letter grade for each narrative quality score, applied to the
/// user map after the stage returns.
pub fn apply_quality_grades(users: &mut BTreeMap<String, UserStats>, narrative: &NarrativeResult) {
    for entry in &narrative.contributors {
        if let Some(user) = users.get_mut(&entry.identity) {
            user.quality_grade =
                Some(scoring::grade_from_quality_score(entry.quality_score).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(identity: &str, score: u64) -> UserStats {
        UserStats {
            identity: identity.to_string(),
            login_resolved: true,
            activity_score: score,
            ..UserStats::default()
        }
    }

    fn user_map(entries: &[(&str, u64)]) -> BTreeMap<String, UserStats> {
        entries
            .iter()
            .map(|(id, score)| (id.to_string(), user(id, *score)))
            .collect()
    }

    #[test]
    fn top_contributors_ranks_by_score() {
        let users = user_map(&[("alice", 10), ("bob", 40), ("carol", 25)]);
        let top = top_contributors(&users, 2);
        let ids: Vec<_> = top.iter().map(|u| u.identity.as_str()).collect();
        assert_eq!(ids, vec!["bob", "carol"]);
    }

    #[test]
    fn top_contributors_breaks_ties_deterministically() {
        let users = user_map(&[("bob", 10), ("alice", 10)]);
        let top = top_contributors(&users, 5);
        let ids: Vec<_> = top.iter().map(|u| u.identity.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = r#"Here you go:
```json
{"summary": "solid week", "contributors": [{"identity": "alice", "assessment": "good", "strengths": ["tests"], "areas_for_improvement": [], "quality_score": 8.0}]}
```"#;
        let result = parse_narrative(raw).unwrap();
        assert_eq!(result.summary, "solid week");
        assert_eq!(result.contributors[0].identity, "alice");
    }

    #[test]
    fn garbage_reply_is_none() {
        assert!(parse_narrative("I cannot help with that").is_none());
        assert!(parse_narrative(r#"{"summary": 12}"#).is_none());
    }

    #[test]
    fn detailed_prompt_requests_grades() {
        let users = user_map(&[("alice", 10)]);
        let top = top_contributors(&users, 5);
        assert!(build_prompt(&top, true).contains("effort_grade"));
        assert!(!build_prompt(&top, false).contains("effort_grade"));
    }

    #[test]
    fn quality_grades_are_applied_to_matching_users() {
        let mut users = user_map(&[("alice", 10), ("bob", 5)]);
        let narrative = NarrativeResult {
            summary: "ok".to_string(),
            contributors: vec![crate::models::report::ContributorNarrative {
                identity: "alice".to_string(),
                assessment: "fine".to_string(),
                strengths: vec![],
                areas_for_improvement: vec![],
                quality_score: 9.5,
                code_quality_grade: None,
                effort_grade: None,
            }],
        };
        apply_quality_grades(&mut users, &narrative);
        assert_eq!(users["alice"].quality_grade.as_deref(), Some("A+"));
        assert!(users["bob"].quality_grade.is_none());
    }

    #[tokio::test]
    async fn missing_api_key_degrades_to_none() {
        let client = NarrativeClient::new(None, "test-model".to_string());
        let users = user_map(&[("alice", 10)]);
        assert!(client.score_top(&users, false).await.is_none());
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Regex(r"generateContent".to_string()))
            .with_status(500)
            .create_async()
            .await;

        let client = NarrativeClient::new(Some("key".to_string()), "test-model".to_string())
            .with_base_url(&server.url());
        let users = user_map(&[("alice", 10)]);
        assert!(client.score_top(&users, false).await.is_none());
    }

    #[tokio::test]
    async fn unparseable_reply_degrades_to_none() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "no json for you"}]}}]
        });
        server
            .mock("POST", mockito::Matcher::Regex(r"generateContent".to_string()))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = NarrativeClient::new(Some("key".to_string()), "test-model".to_string())
            .with_base_url(&server.url());
        let users = user_map(&[("alice", 10)]);
        assert!(client.score_top(&users, false).await.is_none());
    }

    #[tokio::test]
    async fn well_formed_reply_is_scored() {
        let mut server = mockito::Server::new_async().await;
        let narrative = r#"{"summary": "busy week", "contributors": [{"identity": "alice", "assessment": "strong", "strengths": ["focus"], "areas_for_improvement": ["docs"], "quality_score": 8.5}]}"#;
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": format!("```json\n{}\n```", narrative)}]}}]
        });
        server
            .mock("POST", mockito::Matcher::Regex(r"generateContent".to_string()))
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = NarrativeClient::new(Some("key".to_string()), "test-model".to_string())
            .with_base_url(&server.url());
        let users = user_map(&[("alice", 10)]);
        let result = client.score_top(&users, false).await.unwrap();
        assert_eq!(result.summary, "busy week");
        assert_eq!(result.contributors[0].quality_score, 8.5);
    }
}
