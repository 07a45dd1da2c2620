//! Fetcher that talks to platform APIs directly.
//!
//! Jira goes through `gouqi`, GitHub through its REST API and Linear through
//! GraphQL. Only platforms with a usable credential are supported, so the
//! strategy skips straight to the fallback for everything else.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use super::TicketFetcher;
use crate::config::{Config, JiraConfig};
use crate::error::FetchError;
use crate::platform::Platform;
use crate::ticket::payload::RawPayload;
use crate::ticket::TicketId;

const NAME: &str = "direct-api";

const LINEAR_ISSUE_QUERY: &str = r#"
query Issue($id: String!) {
  issue(id: $id) {
    identifier
    title
    description
    url
    priority
    createdAt
    updatedAt
    state { name type }
    assignee { name displayName }
    labels { nodes { name } }
    team { key name }
  }
}
"#;

/// Jira API client wrapper
#[derive(Clone)]
struct JiraClient {
  client: gouqi::r#async::Jira,
  base_url: String,
}

impl JiraClient {
  fn new(config: &JiraConfig, token: String) -> color_eyre::Result<Self> {
    let credentials = if config.is_cloud() {
      gouqi::Credentials::Basic(config.email.clone(), token)
    } else {
      gouqi::Credentials::Bearer(token)
    };
    let client = gouqi::r#async::Jira::new(&config.url, credentials)
      .map_err(|e| eyre!("Failed to create Jira client: {}", e))?;
    Ok(Self {
      client,
      base_url: config.url.trim_end_matches('/').to_string(),
    })
  }

  /// Get a single issue by key as `{key, url, fields}`.
  async fn get_issue(&self, key: &str) -> Result<RawPayload, FetchError> {
    let issue = self
      .client
      .issues()
      .get(key)
      .await
      .map_err(|e| classify_jira_error(key, e))?;

    let fields = serde_json::to_value(&issue.fields).map_err(|e| FetchError::InvalidPayload {
      fetcher: NAME.to_string(),
      message: format!("Failed to parse issue {}: {}", key, e),
    })?;

    let mut payload = RawPayload::new();
    payload.insert(
      "url".into(),
      Value::String(format!("{}/browse/{}", self.base_url, issue.key)),
    );
    payload.insert("key".into(), Value::String(issue.key));
    payload.insert("fields".into(), fields);
    Ok(payload)
  }
}

fn classify_jira_error(key: &str, err: gouqi::Error) -> FetchError {
  match err {
    gouqi::Error::Unauthorized => FetchError::Auth {
      fetcher: NAME.to_string(),
      message: "Jira rejected the configured credentials".to_string(),
    },
    gouqi::Error::NotFound => FetchError::NotFound {
      fetcher: NAME.to_string(),
      message: format!("Jira issue {} does not exist", key),
    },
    other => FetchError::Transient {
      fetcher: NAME.to_string(),
      message: format!("Failed to get issue {}: {}", key, other),
    },
  }
}

/// Direct API integration for the platforms tix has credentials for.
pub struct DirectApiFetcher {
  http: reqwest::Client,
  jira: Option<JiraClient>,
  github_api: String,
  github_token: Option<String>,
  linear_api: String,
  linear_token: Option<String>,
  timeout: Duration,
}

impl DirectApiFetcher {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("tix/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let jira = match (&config.jira, Config::jira_token()) {
      (Some(jira), Some(token)) => Some(JiraClient::new(jira, token)?),
      _ => None,
    };

    Ok(Self {
      http,
      jira,
      github_api: config.github.api_url.trim_end_matches('/').to_string(),
      github_token: Config::github_token(),
      linear_api: config.linear.api_url.clone(),
      linear_token: Config::linear_token(),
      timeout: config.fetch.timeout(),
    })
  }

  async fn fetch_github(&self, ticket_id: &TicketId) -> Result<RawPayload, FetchError> {
    let (repo, number) = ticket_id
      .as_str()
      .rsplit_once('#')
      .ok_or_else(|| FetchError::NotFound {
        fetcher: NAME.to_string(),
        message: format!("'{}' is not an owner/repo#number reference", ticket_id),
      })?;

    let url = format!("{}/repos/{}/issues/{}", self.github_api, repo, number);
    let mut request = self
      .http
      .get(&url)
      .header(ACCEPT, "application/vnd.github+json");
    if let Some(token) = &self.github_token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let etag = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    check_status(status, "GitHub", ticket_id)?;

    let mut payload = into_object(response.json::<Value>().await.map_err(decode_error)?)?;
    if let Some(etag) = etag {
      payload.insert("_etag".into(), Value::String(etag));
    }
    Ok(payload)
  }

  async fn fetch_linear(&self, ticket_id: &TicketId) -> Result<RawPayload, FetchError> {
    let token = self.linear_token.as_deref().ok_or_else(|| FetchError::Auth {
      fetcher: NAME.to_string(),
      message: "no Linear API key configured".to_string(),
    })?;

    let body = json!({
      "query": LINEAR_ISSUE_QUERY,
      "variables": { "id": ticket_id.as_str() },
    });

    let response = self
      .http
      .post(&self.linear_api)
      .header(AUTHORIZATION, token)
      .json(&body)
      .send()
      .await
      .map_err(transport_error)?;
    check_status(response.status(), "Linear", ticket_id)?;

    let mut body = response.json::<Value>().await.map_err(decode_error)?;
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
      if let Some(err) = classify_graphql_errors(errors, ticket_id) {
        return Err(err);
      }
    }

    match body.pointer_mut("/data/issue").map(Value::take) {
      Some(issue @ Value::Object(_)) => into_object(issue),
      _ => Err(FetchError::NotFound {
        fetcher: NAME.to_string(),
        message: format!("Linear issue {} does not exist", ticket_id),
      }),
    }
  }
}

#[async_trait]
impl TicketFetcher for DirectApiFetcher {
  fn name(&self) -> &str {
    NAME
  }

  fn supports(&self, platform: Platform) -> bool {
    match platform {
      Platform::Jira => self.jira.is_some(),
      Platform::Github => true,
      Platform::Linear => self.linear_token.is_some(),
      Platform::AzureDevops | Platform::Monday | Platform::Trello => false,
    }
  }

  fn default_timeout(&self) -> Duration {
    self.timeout
  }

  fn credential_scope(&self, platform: Platform) -> Option<String> {
    match platform {
      Platform::Jira => self.jira.as_ref().map(|j| format!("jira:{}", j.base_url)),
      Platform::Github => self.github_token.as_ref().map(|_| "github:token".to_string()),
      Platform::Linear => self.linear_token.as_ref().map(|_| "linear:token".to_string()),
      _ => None,
    }
  }

  async fn fetch(&self, ticket_id: &TicketId, platform: Platform) -> Result<RawPayload, FetchError> {
    debug!(%platform, ticket = %ticket_id, "Direct API fetch");
    match platform {
      Platform::Jira => match &self.jira {
        Some(jira) => jira.get_issue(ticket_id.as_str()).await,
        None => Err(FetchError::Auth {
          fetcher: NAME.to_string(),
          message: "no Jira credentials configured".to_string(),
        }),
      },
      Platform::Github => self.fetch_github(ticket_id).await,
      Platform::Linear => self.fetch_linear(ticket_id).await,
      other => Err(FetchError::Transient {
        fetcher: NAME.to_string(),
        message: format!("{} is not available through the direct API", other),
      }),
    }
  }
}

fn check_status(status: StatusCode, service: &str, ticket_id: &TicketId) -> Result<(), FetchError> {
  if status.is_success() {
    return Ok(());
  }
  let fetcher = NAME.to_string();
  Err(match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth {
      fetcher,
      message: format!("{} returned {}", service, status),
    },
    StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound {
      fetcher,
      message: format!("{} has no ticket {}", service, ticket_id),
    },
    _ => FetchError::Transient {
      fetcher,
      message: format!("{} returned {}", service, status),
    },
  })
}

fn classify_graphql_errors(errors: &[Value], ticket_id: &TicketId) -> Option<FetchError> {
  let messages: Vec<String> = errors
    .iter()
    .filter_map(|e| e.get("message").and_then(Value::as_str))
    .map(String::from)
    .collect();
  if messages.is_empty() {
    return None;
  }
  let joined = messages.join("; ");
  let lower = joined.to_lowercase();
  let fetcher = NAME.to_string();
  Some(if lower.contains("not found") {
    FetchError::NotFound {
      fetcher,
      message: format!("Linear issue {}: {}", ticket_id, joined),
    }
  } else if lower.contains("authentic") || lower.contains("forbidden") {
    FetchError::Auth {
      fetcher,
      message: joined,
    }
  } else {
    FetchError::Transient {
      fetcher,
      message: joined,
    }
  })
}

fn transport_error(e: reqwest::Error) -> FetchError {
  FetchError::Transient {
    fetcher: NAME.to_string(),
    message: e.to_string(),
  }
}

fn decode_error(e: reqwest::Error) -> FetchError {
  FetchError::InvalidPayload {
    fetcher: NAME.to_string(),
    message: format!("response is not JSON: {}", e),
  }
}

fn into_object(value: Value) -> Result<RawPayload, FetchError> {
  match value {
    Value::Object(map) => Ok(map),
    other => Err(FetchError::InvalidPayload {
      fetcher: NAME.to_string(),
      message: format!("expected a JSON object, got {}", kind_of(&other)),
    }),
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
