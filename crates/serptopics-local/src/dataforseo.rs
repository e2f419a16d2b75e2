use base64::Engine as _;
use serde::Deserialize;
use serptopics_core::{Error, Result, SerpQuery, SerpSnapshot, SerpSource};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn dataforseo_login_from_env() -> Option<String> {
    env("SERPTOPICS_DATAFORSEO_LOGIN")
}

fn dataforseo_password_from_env() -> Option<String> {
    env("SERPTOPICS_DATAFORSEO_PASSWORD")
}

fn dataforseo_endpoint_from_env() -> Option<String> {
    env("SERPTOPICS_DATAFORSEO_ENDPOINT")
}

/// The live endpoint rejects payloads with more than one task, so requests
/// always carry exactly one keyword.
const TASK_STATUS_OK: u32 = 20000;
const FETCH_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct DataForSeoClient {
    client: reqwest::Client,
    login: String,
    password: String,
    endpoint: String,
}

impl DataForSeoClient {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let login = dataforseo_login_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPTOPICS_DATAFORSEO_LOGIN".to_string())
        })?;
        let password = dataforseo_password_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPTOPICS_DATAFORSEO_PASSWORD".to_string())
        })?;
        Ok(Self {
            client,
            login,
            password,
            endpoint: Self::endpoint(),
        })
    }

    pub fn new(
        client: reqwest::Client,
        login: impl Into<String>,
        password: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            login: login.into(),
            password: password.into(),
            endpoint: endpoint.into(),
        }
    }

    fn endpoint() -> String {
        // Docs: https://api.dataforseo.com/v3/serp/google/organic/live/advanced
        dataforseo_endpoint_from_env().unwrap_or_else(|| {
            "https://api.dataforseo.com/v3/serp/google/organic/live/advanced".to_string()
        })
    }

    fn task_payload(keyword: &str, query: &SerpQuery) -> serde_json::Value {
        serde_json::json!([{
            "keyword": base64::engine::general_purpose::STANDARD.encode(keyword),
            "location_code": query.location_code,
            "language_code": query.language_code,
            "depth": query.depth,
        }])
    }
}

#[derive(Debug, Deserialize)]
struct LiveResponse {
    #[serde(default)]
    tasks: Vec<LiveTask>,
}

#[derive(Debug, Deserialize)]
struct LiveTask {
    status_code: Option<u32>,
    status_message: Option<String>,
    result: Option<Vec<LiveResult>>,
}

#[derive(Debug, Deserialize)]
struct LiveResult {
    items: Option<Vec<LiveItem>>,
}

#[derive(Debug, Deserialize)]
struct LiveItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

fn snapshot_from_response(parsed: LiveResponse) -> Result<SerpSnapshot> {
    let task = parsed
        .tasks
        .into_iter()
        .next()
        .ok_or_else(|| Error::Serp("dataforseo live returned no tasks".to_string()))?;

    if task.status_code != Some(TASK_STATUS_OK) {
        return Err(Error::Serp(format!(
            "dataforseo task failed: {}",
            task.status_message
                .unwrap_or_else(|| "unknown task error".to_string())
        )));
    }

    let items = task
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|r| r.items)
        .unwrap_or_default();

    let mut urls = Vec::new();
    let mut titles = Vec::new();
    for item in items {
        if item.kind.as_deref() != Some("organic") {
            continue;
        }
        let Some(item_url) = item.url else {
            continue;
        };
        urls.push(item_url);
        titles.push(item.title.unwrap_or_default());
    }

    Ok(SerpSnapshot::new(urls, titles))
}

#[async_trait::async_trait]
impl SerpSource for DataForSeoClient {
    fn name(&self) -> &'static str {
        "dataforseo"
    }

    async fn fetch_serp(&self, keyword: &str, query: &SerpQuery) -> Result<SerpSnapshot> {
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.login, Some(&self.password))
            .json(&Self::task_payload(keyword, query))
            .timeout(std::time::Duration::from_millis(FETCH_TIMEOUT_MS))
            .send()
            .await
            .map_err(|e| Error::Serp(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Serp(format!("dataforseo live HTTP {status}")));
        }

        let parsed: LiveResponse = resp.json().await.map_err(|e| Error::Serp(e.to_string()))?;
        snapshot_from_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn empty_credentials_are_treated_as_missing() {
        let _g1 = EnvGuard::set("SERPTOPICS_DATAFORSEO_LOGIN", "");
        let _g2 = EnvGuard::set("SERPTOPICS_DATAFORSEO_PASSWORD", "   ");
        assert!(dataforseo_login_from_env().is_none());
        assert!(dataforseo_password_from_env().is_none());
    }

    #[test]
    fn task_payload_is_a_single_base64_task() {
        let payload = DataForSeoClient::task_payload("best running shoes", &SerpQuery::default());
        let tasks = payload.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(
            task.get("keyword").and_then(|v| v.as_str()),
            Some("YmVzdCBydW5uaW5nIHNob2Vz")
        );
        assert_eq!(task.get("location_code").and_then(|v| v.as_u64()), Some(2840));
        assert_eq!(task.get("language_code").and_then(|v| v.as_str()), Some("en"));
        assert_eq!(task.get("depth").and_then(|v| v.as_u64()), Some(10));
    }

    #[test]
    fn parses_minimal_live_shape_keeping_organic_only() {
        let js = r#"
        {
          "tasks": [
            {
              "status_code": 20000,
              "status_message": "Ok.",
              "result": [
                {
                  "keyword": "best running shoes",
                  "items": [
                    {"type":"organic","url":"https://example.com/a","title":"A"},
                    {"type":"paid","url":"https://ads.test/x","title":"Ad"},
                    {"type":"organic","url":"https://example.com/b","title":"B"}
                  ]
                }
              ]
            }
          ]
        }
        "#;
        let parsed: LiveResponse = serde_json::from_str(js).unwrap();
        let snap = snapshot_from_response(parsed).unwrap();
        assert_eq!(snap.urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(snap.titles, vec!["A", "B"]);
    }

    #[test]
    fn truncates_to_serp_depth() {
        let items: Vec<String> = (0..15)
            .map(|i| format!(r#"{{"type":"organic","url":"https://u{i}.test/","title":"t{i}"}}"#))
            .collect();
        let js = format!(
            r#"{{"tasks":[{{"status_code":20000,"result":[{{"items":[{}]}}]}}]}}"#,
            items.join(",")
        );
        let parsed: LiveResponse = serde_json::from_str(&js).unwrap();
        let snap = snapshot_from_response(parsed).unwrap();
        assert_eq!(snap.urls.len(), 10);
        assert_eq!(snap.titles.len(), 10);
    }

    #[test]
    fn task_error_surfaces_the_status_message() {
        let js = r#"{"tasks":[{"status_code":40501,"status_message":"Invalid Field."}]}"#;
        let parsed: LiveResponse = serde_json::from_str(js).unwrap();
        let err = snapshot_from_response(parsed).unwrap_err();
        assert!(err.to_string().contains("Invalid Field."));
    }

    #[test]
    fn empty_tasks_is_an_error() {
        let parsed: LiveResponse = serde_json::from_str(r#"{"tasks":[]}"#).unwrap();
        assert!(snapshot_from_response(parsed).is_err());
    }

    #[tokio::test]
    async fn fetches_a_snapshot_from_a_stub_endpoint() {
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/v3/serp/google/organic/live/advanced",
            post(|| async {
                axum::Json(serde_json::json!({
                    "tasks": [{
                        "status_code": 20000,
                        "result": [{
                            "items": [
                                {"type":"organic","url":"https://example.com/a","title":"A"}
                            ]
                        }]
                    }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = DataForSeoClient::new(
            reqwest::Client::new(),
            "login",
            "password",
            format!("http://{addr}/v3/serp/google/organic/live/advanced"),
        );
        let snap = client
            .fetch_serp("best running shoes", &SerpQuery::default())
            .await
            .unwrap();
        assert_eq!(snap.urls, vec!["https://example.com/a"]);
    }
}
