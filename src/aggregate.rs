//! Final question generation and submission.
//!
//! The outer context plus every sub-question is assembled into one request.
//! Nothing is sent unless every sub-question is answerable and every
//! description placeholder resolves to a generated value.

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::backend::{
  ContextPayload, GenerationBackend, QuestionDetails, QuestionGenerationRequest, QuestionRecord,
  SubQuestionPayload,
};
use crate::domain::{DetailKind, DetailType, GeneratedContext, QuestionBlock, QuestionCreationItem, Scope, SubQuestion};
use crate::error::{Error, Result};
use crate::reducer::{Action, QuestionField};
use crate::session::{FetchKind, GenerationFailure, SessionHandle};
use crate::util::{description_placeholders, trunc_for_log};

/// Where submitted questions get attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Parent {
  Assessment(String),
  QuestionBank(String),
}

fn names_in(list: &[GeneratedContext]) -> impl Iterator<Item = &str> + '_ {
  list
    .iter()
    .flat_map(|g| g.name.as_deref().into_iter().chain(g.context.keys().map(String::as_str)))
}

fn check_placeholders(text: &str, known: &[&str], what: &str) -> Result<()> {
  let missing: Vec<&str> = description_placeholders(text).into_iter().filter(|p| !known.contains(p)).collect();
  if missing.is_empty() {
    Ok(())
  } else {
    Err(Error::validation(format!("{what} uses unresolved variables: {}", missing.join(", "))))
  }
}

pub fn validate(state: &QuestionBlock) -> Result<()> {
  for (i, sq) in state.sub_questions.iter().enumerate() {
    if sq.selected_queryable.is_empty() && sq.selected_input_queryable.is_empty() {
      return Err(Error::validation(format!("sub-question {} has no queryable selected", i + 1)));
    }
  }

  let outer: Vec<&str> = names_in(&state.context.generated).collect();
  check_placeholders(&state.description, &outer, "the question description")?;
  for (i, sq) in state.sub_questions.iter().enumerate() {
    let known: Vec<&str> = outer.iter().copied().chain(names_in(&sq.context.generated)).collect();
    check_placeholders(&sq.description, &known, &format!("sub-question {}", i + 1))?;
  }
  Ok(())
}

/// Context payload of the outer entry a sub-question points at; all-empty if
/// none is selected or the entry no longer exists.
fn context_payload(state: &QuestionBlock, sq: &SubQuestion) -> ContextPayload {
  let Some(detail) = sq.context.selected_detail.and_then(|id| state.context.detail(id)) else {
    return ContextPayload::default();
  };
  let user_env_code = state.context.user_env_code.clone();
  match &detail.kind {
    DetailKind::Algo(a) => ContextPayload {
      kind: Some(DetailType::Algo),
      topic: a.selected_topic.clone(),
      subtopic: a.selected_subtopic.clone(),
      user_algo_code: a.user_algo_code.clone(),
      user_env_code,
      context_init: a.arguments_init.clone(),
      ..Default::default()
    },
    DetailKind::Input(i) => ContextPayload {
      kind: Some(DetailType::Input),
      input_path: i.path_string(),
      user_env_code,
      context_init: i.input_init.clone(),
      ..Default::default()
    },
  }
}

pub fn build_request(state: &QuestionBlock) -> Result<QuestionGenerationRequest> {
  validate(state)?;
  let sub_questions = state
    .sub_questions
    .iter()
    .map(|sq| SubQuestionPayload {
      description: sq.description.clone(),
      context: context_payload(state, sq),
      queryable: sq.selected_queryable.clone(),
      input_queryable: sq.selected_input_queryable.clone(),
      generated_context: sq.context.generated.clone(),
      question_details: QuestionDetails { marks: sq.marks, num_options: sq.num_options },
    })
    .collect();
  Ok(QuestionGenerationRequest {
    description: state.description.clone(),
    generated_context: state.context.generated.clone(),
    sub_questions,
  })
}

/// Send the assembled request; the returned items replace
/// `generated_questions`. `loading` is set for the duration of the call.
#[instrument(level = "info", skip(handle, backend), target = "generation")]
pub async fn generate_question(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
) -> Result<Vec<QuestionCreationItem>> {
  let (request, ticket) = {
    let mut s = handle.lock().await;
    if s.state().loading {
      return Err(Error::InFlight);
    }
    let request = build_request(s.state())?;
    s.dispatch(Action::SetField(QuestionField::Loading(true)));
    (request, s.issue(Scope::Outer, FetchKind::Questions))
  };
  info!(
    target: "generation",
    sub_questions = request.sub_questions.len(),
    description = %trunc_for_log(&request.description, 80),
    "Requesting question generation"
  );

  let result = backend.generate_question(&request).await;

  let mut s = handle.lock().await;
  s.dispatch(Action::SetField(QuestionField::Loading(false)));
  if !s.is_current(&ticket) {
    warn!(target: "generation", "Draft was reset while questions were generating; result dropped");
    return Err(Error::validation("the draft was reset while questions were generating"));
  }
  match result {
    Ok(items) => {
      s.dispatch(Action::SetGeneratedQuestions(items.clone()));
      s.clear_last_error();
      info!(target: "generation", count = items.len(), "Questions generated");
      Ok(items)
    }
    Err(e) => {
      error!(target: "generation", error = %e, "Question generation failed");
      s.set_last_error(GenerationFailure { scope: Scope::Outer, detail_id: None, message: e.to_string() });
      Err(e)
    }
  }
}

/// Persist the generated questions and attach them to `parent`. A session
/// re-opened from an existing question updates that question with the first
/// item. Returns the ids of the stored questions.
#[instrument(level = "info", skip(handle, backend), target = "qforge_backend")]
pub async fn submit(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  parent: Option<Parent>,
) -> Result<Vec<String>> {
  let (items, owner, blob, existing) = {
    let s = handle.lock().await;
    let items = s.state().generated_questions.clone();
    if items.is_empty() {
      return Err(Error::validation("generate questions before submitting"));
    }
    (items, s.identity.user_id.clone(), s.persisted_state(), s.question_id.clone())
  };

  let mut ids = Vec::with_capacity(items.len());
  for (i, item) in items.into_iter().enumerate() {
    let record = QuestionRecord { owner: owner.clone(), item, state: blob.clone() };
    let stored = match (&existing, i) {
      (Some(id), 0) => backend.update_question(id, &record).await?,
      _ => backend.create_question(&record).await?,
    };
    match &parent {
      Some(Parent::Assessment(a)) => backend.add_existing_question_to_assessment(a, &stored.id).await?,
      Some(Parent::QuestionBank(b)) => backend.add_existing_question_to_question_bank(b, &stored.id).await?,
      None => {}
    }
    ids.push(stored.id);
  }

  let mut s = handle.lock().await;
  if s.question_id.is_none() {
    s.question_id = ids.first().cloned();
  }
  info!(target: "qforge_backend", count = ids.len(), owner = %owner, "Questions submitted");
  Ok(ids)
}
