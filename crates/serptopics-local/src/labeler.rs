//! Cluster labeling through an OpenAI-compatible chat endpoint.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serptopics_core::{Cluster, ClusterLabel, ClusterLabeler, Error, Result, SerpSnapshot};
use std::collections::BTreeMap;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn openai_compat_base_url_from_env() -> Option<String> {
    env("SERPTOPICS_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    env("SERPTOPICS_OPENAI_COMPAT_API_KEY")
}

fn openai_compat_model_from_env() -> Option<String> {
    env("SERPTOPICS_OPENAI_COMPAT_MODEL")
}

const SYSTEM_PROMPT: &str = "You are an SEO expert specializing in search intent analysis.";
// Clusters can be large; the label only needs a sample.
const MAX_PROMPT_KEYWORDS: usize = 20;
const MAX_PROMPT_TITLES: usize = 10;
const CHAT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct OpenAiCompatLabeler {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatLabeler {
    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPTOPICS_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = openai_compat_api_key_from_env();

        let model = model_override
            .or_else(openai_compat_model_from_env)
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for labeling (set --model or SERPTOPICS_OPENAI_COMPAT_MODEL)"
                        .to_string(),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn label_prompt(keywords: &[String], titles: &[String]) -> String {
    let keywords = keywords
        .iter()
        .take(MAX_PROMPT_KEYWORDS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let titles = titles
        .iter()
        .take(MAX_PROMPT_TITLES)
        .map(|t| format!("- {t}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the following keyword cluster and SERP titles to determine \
the user intent and a descriptive label.\n\n\
Keywords:\n{keywords}\n\n\
Top Ranking Titles:\n{titles}\n\n\
Step 1: Analyze the keywords and titles to understand the core topic.\n\
Step 2: Identify the common user needs (e.g., looking for a product, \
wanting to learn, trying to find a specific website).\n\
Step 3: Reason whether the intent is Informational, Commercial, \
Transactional, or Navigational.\n\
Step 4: Create a short, human-readable label (2-4 words) for this cluster.\n\n\
Output the result in JSON format with keys: \"reasoning\", \"intent\", \
\"label\"."
    )
}

fn parse_label_json(content: &str) -> Result<ClusterLabel> {
    // Some models wrap JSON output in a fenced code block despite the
    // json_object response format.
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(body)
        .map_err(|e| Error::Llm(format!("label response was not valid JSON: {e}")))
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[async_trait::async_trait]
impl ClusterLabeler for OpenAiCompatLabeler {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn label(&self, keywords: &[String], titles: &[String]) -> Result<ClusterLabel> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: label_prompt(keywords, titles),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
            stream: false,
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(std::time::Duration::from_millis(CHAT_TIMEOUT_MS))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        parse_label_json(content)
    }
}

/// Labels every cluster with a bounded number of in-flight requests.
///
/// The leader's titles accompany each cluster's keywords. Failed clusters
/// are logged and simply absent from the result; downstream consumers must
/// tolerate missing labels.
pub async fn label_clusters(
    labeler: &dyn ClusterLabeler,
    clusters: &[Cluster],
    snapshots: &BTreeMap<String, SerpSnapshot>,
    max_in_flight: usize,
) -> BTreeMap<u32, ClusterLabel> {
    let max_in_flight = max_in_flight.max(1);

    let jobs = clusters.iter().map(|cluster| async move {
        let titles = cluster
            .leader()
            .and_then(|leader| snapshots.get(leader))
            .map(|s| s.titles.clone())
            .unwrap_or_default();
        (cluster.id, labeler.label(&cluster.keywords, &titles).await)
    });

    let results: Vec<(u32, Result<ClusterLabel>)> = futures_util::stream::iter(jobs)
        .buffer_unordered(max_in_flight)
        .collect()
        .await;

    let mut out = BTreeMap::new();
    for (id, result) in results {
        match result {
            Ok(label) => {
                out.insert(id, label);
            }
            Err(e) => log::warn!("labeling failed for cluster {id}: {e}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_caps_keywords_and_titles() {
        let keywords: Vec<String> = (0..30).map(|i| format!("kw{i}")).collect();
        let titles: Vec<String> = (0..15).map(|i| format!("title{i}")).collect();
        let prompt = label_prompt(&keywords, &titles);
        assert!(prompt.contains("kw19"));
        assert!(!prompt.contains("kw20"));
        assert!(prompt.contains("- title9"));
        assert!(!prompt.contains("- title10"));
    }

    #[test]
    fn parses_a_plain_json_label() {
        let label = parse_label_json(
            r#"{"reasoning":"shoppers comparing models","intent":"Commercial","label":"Running Shoes"}"#,
        )
        .unwrap();
        assert_eq!(label.label, "Running Shoes");
        assert_eq!(label.intent, "Commercial");
        assert_eq!(label.reasoning, "shoppers comparing models");
    }

    #[test]
    fn parses_a_fenced_json_label() {
        let label = parse_label_json(
            "```json\n{\"reasoning\":\"r\",\"intent\":\"Informational\",\"label\":\"L\"}\n```",
        )
        .unwrap();
        assert_eq!(label.intent, "Informational");
    }

    #[test]
    fn missing_keys_default_to_empty() {
        let label = parse_label_json(r#"{"label":"Only Label"}"#).unwrap();
        assert_eq!(label.label, "Only Label");
        assert!(label.intent.is_empty());
        assert!(label.reasoning.is_empty());
    }

    #[test]
    fn non_json_is_an_llm_error() {
        assert!(parse_label_json("no json here").is_err());
    }

    struct StubLabeler {
        fail_for: &'static str,
    }

    #[async_trait::async_trait]
    impl ClusterLabeler for StubLabeler {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn label(&self, keywords: &[String], titles: &[String]) -> Result<ClusterLabel> {
            let leader = keywords.first().cloned().unwrap_or_default();
            if leader == self.fail_for {
                return Err(Error::Llm("boom".to_string()));
            }
            Ok(ClusterLabel {
                label: format!("label for {leader}"),
                intent: "Informational".to_string(),
                reasoning: format!("{} titles seen", titles.len()),
            })
        }
    }

    #[tokio::test]
    async fn labels_clusters_and_omits_failures() {
        let clusters = vec![
            Cluster {
                id: 1,
                keywords: vec!["alpha".to_string(), "beta".to_string()],
            },
            Cluster {
                id: 2,
                keywords: vec!["broken".to_string()],
            },
        ];
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "alpha".to_string(),
            SerpSnapshot::new(
                vec!["https://u.test/".to_string()],
                vec!["Alpha Title".to_string()],
            ),
        );

        let labeler = StubLabeler { fail_for: "broken" };
        let labels = label_clusters(&labeler, &clusters, &snapshots, 4).await;

        assert_eq!(labels.len(), 1);
        assert_eq!(labels[&1].label, "label for alpha");
        assert_eq!(labels[&1].reasoning, "1 titles seen");
        assert!(!labels.contains_key(&2));
    }

    #[tokio::test]
    async fn zero_in_flight_cap_is_clamped() {
        let clusters = vec![Cluster {
            id: 1,
            keywords: vec!["alpha".to_string()],
        }];
        let labeler = StubLabeler { fail_for: "" };
        let labels = label_clusters(&labeler, &clusters, &BTreeMap::new(), 0).await;
        assert_eq!(labels.len(), 1);
    }
}
