//! Client for the content backend: catalog lookups, code introspection,
//! generation endpoints and question persistence.
//!
//! The engine only talks to `GenerationBackend`; `HttpBackend` is the JSON over
//! HTTP implementation. Calls are instrumented and log latencies and sizes
//! (never payload contents).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::arguments::TypedArguments;
use crate::config::BackendConfig;
use crate::domain::{
  DetailType, GeneratedContext, InputNode, QuestionCreationItem, Queryable, Subtopic, Topic,
  VariableDescriptor,
};
use crate::error::{Error, Result};

// --- Generation DTOs ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateVariableRequest {
  pub topic: String,
  pub subtopic: String,
  pub quantifiables: BTreeMap<String, String>,
  pub subclasses: BTreeMap<String, String>,
  pub arguments: TypedArguments,
  pub arguments_init: BTreeMap<String, Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_algo_code: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_env_code: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateInputRequest {
  pub input_path: String,
  pub arguments: TypedArguments,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_init: Option<BTreeMap<String, Value>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_env_code: Option<String>,
  pub quantifiables: BTreeMap<String, String>,
}

/// Shared response of both generation endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
  #[serde(default)]
  pub context: BTreeMap<String, Value>,
  #[serde(default)]
  pub context_init: BTreeMap<String, Value>,
  #[serde(default)]
  pub cls_name: Option<String>,
  #[serde(default)]
  pub has_output: bool,
}

/// Effective context of a sub-question (or the question) in the final request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<DetailType>,
  pub topic: String,
  pub subtopic: String,
  pub input_path: String,
  pub user_algo_code: String,
  pub user_env_code: String,
  pub context_init: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetails {
  pub marks: u32,
  pub num_options: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionPayload {
  pub description: String,
  pub context: ContextPayload,
  pub queryable: String,
  pub input_queryable: String,
  pub generated_context: Vec<GeneratedContext>,
  pub question_details: QuestionDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionGenerationRequest {
  pub description: String,
  pub generated_context: Vec<GeneratedContext>,
  pub sub_questions: Vec<SubQuestionPayload>,
}

/// `generateQuestion` answers either with a bare list or a wrapped payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum GenerateQuestionResponse {
  Items(Vec<QuestionCreationItem>),
  Payload { questions: Vec<QuestionCreationItem> },
}

impl GenerateQuestionResponse {
  pub fn into_items(self) -> Vec<QuestionCreationItem> {
    match self {
      GenerateQuestionResponse::Items(items) => items,
      GenerateQuestionResponse::Payload { questions } => questions,
    }
  }
}

// --- Persistence DTOs ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
  pub owner: String,
  #[serde(flatten)]
  pub item: QuestionCreationItem,
  /// Serialized draft, used to re-open the question for editing.
  pub state: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionRef {
  pub id: String,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
  async fn get_topics(&self) -> Result<Vec<Topic>>;
  async fn get_subtopics(&self, topic: &str) -> Result<Vec<Subtopic>>;
  async fn get_queryables(&self, topic: &str, subtopic: &str) -> Result<Vec<Queryable>>;
  /// Variables of the algorithm behind a (topic, subtopic) pair.
  async fn get_algo_variables(&self, topic: &str, subtopic: &str) -> Result<Vec<VariableDescriptor>>;
  /// Variables of one queryable of that algorithm.
  async fn get_variables(
    &self,
    topic: &str,
    subtopic: &str,
    queryable: &str,
  ) -> Result<Vec<VariableDescriptor>>;
  async fn get_quantifiables(&self) -> Result<Vec<String>>;

  async fn get_user_algo_variables(&self, code: &str) -> Result<Vec<VariableDescriptor>>;
  async fn get_user_queryables(&self, code: &str) -> Result<Vec<Queryable>>;

  async fn list_inputs(&self) -> Result<Vec<InputNode>>;
  async fn list_input_variables(&self, input_path: &str) -> Result<Vec<VariableDescriptor>>;
  async fn get_input_queryables(&self, input_path: &str) -> Result<Vec<Queryable>>;
  async fn get_input_queryable_variables(
    &self,
    input_path: &str,
    queryable: &str,
  ) -> Result<Vec<VariableDescriptor>>;

  async fn generate_variable(&self, req: &GenerateVariableRequest) -> Result<GenerateResponse>;
  async fn generate_input(&self, req: &GenerateInputRequest) -> Result<GenerateResponse>;
  async fn generate_question(
    &self,
    req: &QuestionGenerationRequest,
  ) -> Result<Vec<QuestionCreationItem>>;

  async fn create_question(&self, record: &QuestionRecord) -> Result<QuestionRef>;
  async fn update_question(&self, id: &str, record: &QuestionRecord) -> Result<QuestionRef>;
  async fn add_existing_question_to_assessment(&self, assessment_id: &str, question_id: &str) -> Result<()>;
  async fn add_existing_question_to_question_bank(&self, bank_id: &str, question_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpBackend {
  pub client: reqwest::Client,
  pub base_url: String,
  pub api_key: Option<String>,
}

#[derive(Serialize)]
struct CodeIn<'a> {
  code: &'a str,
}

#[derive(Serialize)]
struct InputPathIn<'a> {
  input_path: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  queryable: Option<&'a str>,
}

#[derive(Serialize)]
struct LinkIn<'a> {
  question_id: &'a str,
}

impl HttpBackend {
  pub fn new(cfg: &BackendConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
    })
  }

  fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
    let url = format!("{}{}", self.base_url, path);
    let mut req = self
      .client
      .request(method, url)
      .header(USER_AGENT, "qforge-backend/0.1")
      .header(CONTENT_TYPE, "application/json");
    if let Some(key) = &self.api_key {
      req = req.bearer_auth(key);
    }
    req
  }

  async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, path: &str) -> Result<T> {
    let start = Instant::now();
    let res = req.send().await?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let msg = extract_backend_error(&body).unwrap_or(body);
      error!(target: "qforge_backend", %path, %status, elapsed = ?start.elapsed(), "Backend call failed");
      return Err(Error::Backend(format!("HTTP {}: {}", status, msg)));
    }
    let bytes = res.bytes().await?;
    debug!(target: "qforge_backend", %path, elapsed = ?start.elapsed(), resp_bytes = bytes.len(), "Backend call ok");
    if bytes.is_empty() {
      // Link endpoints answer with an empty body.
      return serde_json::from_str("null").map_err(|e| Error::Backend(format!("JSON parse error: {e}")));
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::Backend(format!("JSON parse error: {e}")))
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
    let req = self.request(reqwest::Method::GET, path).query(query);
    self.send(req, path).await
  }

  async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
    let req = self.request(reqwest::Method::POST, path).json(body);
    self.send(req, path).await
  }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
  #[instrument(level = "debug", skip(self))]
  async fn get_topics(&self) -> Result<Vec<Topic>> {
    self.get_json("/topics", &[]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_subtopics(&self, topic: &str) -> Result<Vec<Subtopic>> {
    self.get_json("/subtopics", &[("topic", topic)]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_queryables(&self, topic: &str, subtopic: &str) -> Result<Vec<Queryable>> {
    self
      .get_json("/queryables", &[("topic", topic), ("subtopic", subtopic)])
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_algo_variables(&self, topic: &str, subtopic: &str) -> Result<Vec<VariableDescriptor>> {
    self
      .get_json("/variables", &[("topic", topic), ("subtopic", subtopic)])
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_variables(
    &self,
    topic: &str,
    subtopic: &str,
    queryable: &str,
  ) -> Result<Vec<VariableDescriptor>> {
    self
      .get_json(
        "/variables",
        &[("topic", topic), ("subtopic", subtopic), ("queryable", queryable)],
      )
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_quantifiables(&self) -> Result<Vec<String>> {
    self.get_json("/quantifiables", &[]).await
  }

  #[instrument(level = "debug", skip(self, code), fields(code_len = code.len()))]
  async fn get_user_algo_variables(&self, code: &str) -> Result<Vec<VariableDescriptor>> {
    self.post_json("/user-code/variables", &CodeIn { code }).await
  }

  #[instrument(level = "debug", skip(self, code), fields(code_len = code.len()))]
  async fn get_user_queryables(&self, code: &str) -> Result<Vec<Queryable>> {
    self.post_json("/user-code/queryables", &CodeIn { code }).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn list_inputs(&self) -> Result<Vec<InputNode>> {
    self.get_json("/inputs", &[]).await
  }

  #[instrument(level = "debug", skip(self))]
  async fn list_input_variables(&self, input_path: &str) -> Result<Vec<VariableDescriptor>> {
    self
      .post_json("/inputs/variables", &InputPathIn { input_path, queryable: None })
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_input_queryables(&self, input_path: &str) -> Result<Vec<Queryable>> {
    self
      .post_json("/inputs/queryables", &InputPathIn { input_path, queryable: None })
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn get_input_queryable_variables(
    &self,
    input_path: &str,
    queryable: &str,
  ) -> Result<Vec<VariableDescriptor>> {
    self
      .post_json(
        "/inputs/queryables/variables",
        &InputPathIn { input_path, queryable: Some(queryable) },
      )
      .await
  }

  #[instrument(level = "info", skip(self, req), fields(topic = %req.topic, subtopic = %req.subtopic, n_vars = req.arguments.len()))]
  async fn generate_variable(&self, req: &GenerateVariableRequest) -> Result<GenerateResponse> {
    let start = Instant::now();
    let res: GenerateResponse = self.post_json("/generate/variable", req).await?;
    info!(elapsed = ?start.elapsed(), n_context = res.context.len(), "Variable generated");
    Ok(res)
  }

  #[instrument(level = "info", skip(self, req), fields(input_path = %req.input_path, inherits = req.input_init.is_some()))]
  async fn generate_input(&self, req: &GenerateInputRequest) -> Result<GenerateResponse> {
    let start = Instant::now();
    let res: GenerateResponse = self.post_json("/generate/input", req).await?;
    info!(elapsed = ?start.elapsed(), n_context = res.context.len(), "Input generated");
    Ok(res)
  }

  #[instrument(level = "info", skip(self, req), fields(n_sub = req.sub_questions.len()))]
  async fn generate_question(
    &self,
    req: &QuestionGenerationRequest,
  ) -> Result<Vec<QuestionCreationItem>> {
    let start = Instant::now();
    let res: GenerateQuestionResponse = self.post_json("/generate/question", req).await?;
    let items = res.into_items();
    info!(elapsed = ?start.elapsed(), n_items = items.len(), "Questions generated");
    Ok(items)
  }

  #[instrument(level = "info", skip(self, record), fields(owner = %record.owner))]
  async fn create_question(&self, record: &QuestionRecord) -> Result<QuestionRef> {
    self.post_json("/questions", record).await
  }

  #[instrument(level = "info", skip(self, record), fields(owner = %record.owner))]
  async fn update_question(&self, id: &str, record: &QuestionRecord) -> Result<QuestionRef> {
    let path = format!("/questions/{id}");
    let req = self.request(reqwest::Method::PUT, &path).json(record);
    self.send(req, &path).await
  }

  #[instrument(level = "info", skip(self))]
  async fn add_existing_question_to_assessment(&self, assessment_id: &str, question_id: &str) -> Result<()> {
    let path = format!("/assessments/{assessment_id}/questions");
    let _: Value = self.post_json(&path, &LinkIn { question_id }).await?;
    Ok(())
  }

  #[instrument(level = "info", skip(self))]
  async fn add_existing_question_to_question_bank(&self, bank_id: &str, question_id: &str) -> Result<()> {
    let path = format!("/question-banks/{bank_id}/questions");
    let _: Value = self.post_json(&path, &LinkIn { question_id }).await?;
    Ok(())
  }
}

/// Try to extract a clean error message from a backend error body.
fn extract_backend_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
  }
  serde_json::from_str::<EBody>(body)
    .ok()
    .and_then(|b| b.error.or(b.detail))
}
