//! Generation of concrete values for one context entry.
//!
//! A call runs in three steps. `prepare_*` validates the open entry, converts
//! its raw arguments and claims the entry's in-flight slot. The backend call
//! then runs with the session unlocked. `finish` folds the response back:
//! exactly one generated record per successful call, nothing on failure.

use std::collections::BTreeMap;

use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::arguments::convert_arguments;
use crate::backend::{GenerateInputRequest, GenerateResponse, GenerateVariableRequest, GenerationBackend};
use crate::cascade::{context_of, edit_detail};
use crate::domain::{Detail, DetailId, DetailKind, GeneratedContext, GeneratedKind, Scope};
use crate::error::{Error, Result};
use crate::reducer::Action;
use crate::session::{GenerationFailure, Session, SessionHandle, Ticket};

/// What the entry was bound to when the request left. A response for an entry
/// that has since been re-pointed elsewhere is not applied.
#[derive(Clone, Debug, PartialEq)]
enum Binding {
  Algo { topic: String, subtopic: String, user_code: String },
  Input { path: Vec<String> },
}

impl Binding {
  fn of(detail: &Detail) -> Self {
    match &detail.kind {
      DetailKind::Algo(a) => Binding::Algo {
        topic: a.selected_topic.clone(),
        subtopic: a.selected_subtopic.clone(),
        user_code: a.user_algo_code.clone(),
      },
      DetailKind::Input(i) => Binding::Input { path: i.input_path.clone() },
    }
  }
}

/// A claimed generation slot plus the request to send.
#[derive(Debug)]
pub struct Pending<R> {
  scope: Scope,
  detail: DetailId,
  kind: GeneratedKind,
  ticket: Ticket,
  binding: Binding,
  pub request: R,
}

fn optional(code: &str) -> Option<String> {
  (!code.trim().is_empty()).then(|| code.to_string())
}

fn open_entry(session: &Session, scope: Scope) -> Result<&Detail> {
  context_of(session, scope)?.open_detail().ok_or(Error::NoOpenDetail)
}

pub fn prepare_variable(session: &mut Session, scope: Scope) -> Result<Pending<GenerateVariableRequest>> {
  let ctx = context_of(session, scope)?;
  let detail = open_entry(session, scope)?;
  let DetailKind::Algo(algo) = &detail.kind else {
    return Err(Error::validation("the open context entry is not an algorithm entry"));
  };
  if algo.algo_variables.is_empty() {
    return Err(Error::validation("the algorithm has no variables to generate"));
  }
  let polymorphic: Vec<_> = algo.algo_variables.iter().filter(|v| v.declares_subclasses()).collect();
  let any_chosen = polymorphic
    .iter()
    .any(|v| algo.selected_subclasses.get(&v.name).is_some_and(|s| !s.is_empty()));
  if !polymorphic.is_empty() && !any_chosen {
    return Err(Error::validation("select at least one subclass"));
  }

  let request = GenerateVariableRequest {
    topic: algo.selected_topic.clone(),
    subtopic: algo.selected_subtopic.clone(),
    quantifiables: algo.selected_quantifiables.clone(),
    subclasses: algo.selected_subclasses.clone(),
    arguments: convert_arguments(&algo.algo_variables, &algo.selected_subclasses, &algo.variable_arguments)?,
    arguments_init: algo.reuse.iter().map(|(var, b)| (var.clone(), b.init.clone())).collect(),
    user_algo_code: optional(&algo.user_algo_code),
    user_env_code: optional(&ctx.user_env_code),
  };
  let (id, binding) = (detail.id, Binding::of(detail));
  let ticket = session.begin_generation(scope, id)?;
  Ok(Pending { scope, detail: id, kind: GeneratedKind::Algo, ticket, binding, request })
}

/// With `inherit_outer`, a sub-question's request carries the init snapshot
/// of the outer context's most recent bound input entry.
pub fn prepare_input(
  session: &mut Session,
  scope: Scope,
  inherit_outer: bool,
) -> Result<Pending<GenerateInputRequest>> {
  let ctx = context_of(session, scope)?;
  let detail = open_entry(session, scope)?;
  let DetailKind::Input(input) = &detail.kind else {
    return Err(Error::validation("the open context entry is not an input entry"));
  };
  if input.input_variables.is_empty() {
    return Err(Error::validation("the input has no variables to generate"));
  }

  let input_init = match scope {
    Scope::Sub(_) if inherit_outer => session.state().context.latest_input_init().cloned(),
    _ => None,
  };
  let request = GenerateInputRequest {
    input_path: input.path_string(),
    arguments: convert_arguments(&input.input_variables, &BTreeMap::new(), &input.input_variable_arguments)?,
    input_init,
    user_env_code: optional(&ctx.user_env_code),
    quantifiables: input.selected_quantifiables.clone(),
  };
  let (id, binding) = (detail.id, Binding::of(detail));
  let ticket = session.begin_generation(scope, id)?;
  Ok(Pending { scope, detail: id, kind: GeneratedKind::Input, ticket, binding, request })
}

/// Fold a backend result into the session. `Ok(None)` means the entry changed
/// or vanished while the call was running and the response was dropped.
pub fn finish<R>(
  session: &mut Session,
  pending: Pending<R>,
  result: Result<GenerateResponse>,
) -> Result<Option<GeneratedContext>> {
  let Pending { scope, detail, kind, ticket, binding, .. } = pending;
  session.end_generation(&ticket);

  let response = match result {
    Ok(r) => r,
    Err(e) => {
      error!(target: "generation", ?scope, detail = detail.0, error = %e, "Generation failed");
      session.set_last_error(GenerationFailure { scope, detail_id: Some(detail), message: e.to_string() });
      return Err(e);
    }
  };

  let still_bound = session
    .state()
    .context(scope)
    .and_then(|c| c.detail(detail))
    .is_some_and(|d| Binding::of(d) == binding);
  if !session.is_current(&ticket) || !still_bound {
    debug!(target: "generation", ?scope, detail = detail.0, "Dropping generation result for a changed entry");
    return Ok(None);
  }

  let record = GeneratedContext {
    id: Uuid::new_v4(),
    kind,
    detail_id: detail,
    context: response.context,
    context_init: response.context_init.clone(),
    has_output: response.has_output,
    name: response.cls_name,
  };
  session.dispatch(Action::AppendGeneratedContext { scope, record: record.clone() });
  let init = response.context_init;
  edit_detail(session, scope, detail, |kind| match kind {
    DetailKind::Algo(a) => {
      a.reuse.clear();
      a.arguments_init = init;
    }
    DetailKind::Input(i) => {
      i.reuse.clear();
      i.input_init = init;
    }
  });
  session.clear_last_error();

  info!(target: "generation", ?scope, detail = detail.0, record = %record.id, "Generated context appended");
  Ok(Some(record))
}

/// Generate values for the open algorithm entry of `scope`.
#[instrument(level = "info", skip(handle, backend), target = "generation")]
pub async fn generate_variables(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
) -> Result<Option<GeneratedContext>> {
  let pending = prepare_variable(&mut *handle.lock().await, scope)?;
  let result = backend.generate_variable(&pending.request).await;
  finish(&mut *handle.lock().await, pending, result)
}

/// Generate a concrete input for the open input entry of `scope`.
#[instrument(level = "info", skip(handle, backend), target = "generation")]
pub async fn generate_input(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  inherit_outer: bool,
) -> Result<Option<GeneratedContext>> {
  let pending = prepare_input(&mut *handle.lock().await, scope, inherit_outer)?;
  let result = backend.generate_input(&pending.request).await;
  finish(&mut *handle.lock().await, pending, result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arguments::ArgValue;
  use crate::backend::fake::FakeBackend;
  use crate::cascade::{add_detail, edit_open_algo, edit_open, remove_detail, set_argument};
  use crate::domain::{ArgumentDecl, DetailType, InputDetails, ReuseSource, SubclassDecl, VariableDescriptor};
  use crate::reuse::use_generated_input;
  use crate::session::test_identity;
  use serde_json::json;

  fn int_var(name: &str) -> VariableDescriptor {
    VariableDescriptor {
      name: name.into(),
      ty: "int".into(),
      arguments: vec![ArgumentDecl { name: "value".into(), ty: "int".into() }],
      subclasses: vec![],
    }
  }

  fn backend() -> FakeBackend {
    FakeBackend {
      generated: GenerateResponse {
        context: BTreeMap::from([("n".to_string(), json!(5))]),
        context_init: BTreeMap::from([("n".to_string(), json!({"value": 5}))]),
        cls_name: Some("Sorter".into()),
        has_output: true,
      },
      ..Default::default()
    }
  }

  fn algo_session() -> SessionHandle {
    let mut s = Session::new(test_identity());
    edit_open_algo(&mut s, Scope::Outer, true, |a| {
      a.selected_topic = "sorting".into();
      a.selected_subtopic = "bubble".into();
      a.algo_variables = vec![int_var("n")];
      a.variable_arguments.insert("n".into(), BTreeMap::from([("value".to_string(), "5".to_string())]));
      Ok(())
    })
    .unwrap();
    s.into_handle()
  }

  fn generated_len(s: &Session, scope: Scope) -> usize {
    s.state().context(scope).unwrap().generated.len()
  }

  #[tokio::test]
  async fn success_appends_exactly_one_record() {
    let b = backend();
    let h = algo_session();
    let record = generate_variables(&h, &b, Scope::Outer).await.unwrap().unwrap();

    let sent = b.last_variable_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.arguments["n"]["value"], ArgValue::Int(5));
    assert_eq!(sent.topic, "sorting");

    let s = h.lock().await;
    assert_eq!(generated_len(&s, Scope::Outer), 1);
    assert_eq!(s.state().context.generated[0].id, record.id);
    assert_eq!(record.name.as_deref(), Some("Sorter"));
    assert_eq!(s.state().context.open_algo().unwrap().arguments_init["n"], json!({"value": 5}));
    assert!(!s.is_generating(Scope::Outer, record.detail_id));
  }

  #[tokio::test]
  async fn success_consumes_an_active_reuse_binding() {
    let b = backend();
    let h = algo_session();
    {
      let mut s = h.lock().await;
      let source = GeneratedContext {
        id: Uuid::new_v4(),
        kind: GeneratedKind::Input,
        detail_id: DetailId(9),
        context: BTreeMap::new(),
        context_init: BTreeMap::from([("int".to_string(), json!({"value": 7}))]),
        has_output: false,
        name: None,
      };
      s.dispatch(Action::AppendGeneratedContext { scope: Scope::Outer, record: source });
      use_generated_input(&mut s, Scope::Outer, "n", ReuseSource::Local, 0).unwrap();
    }

    generate_variables(&h, &b, Scope::Outer).await.unwrap().unwrap();
    let sent = b.last_variable_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.arguments_init["n"], json!({"value": 7}));
    assert_eq!(sent.arguments["n"]["value"], ArgValue::Int(7));

    let s = h.lock().await;
    let algo = s.state().context.open_algo().unwrap();
    assert!(algo.reuse.is_empty());
    assert_eq!(algo.arguments_init["n"], json!({"value": 5}));
    // manual entry is unlocked again
    drop(s);
    set_argument(&mut *h.lock().await, Scope::Outer, "n", "value", "8".into()).unwrap();
  }

  #[tokio::test]
  async fn outer_slot_survives_sub_question_removal() {
    let b = backend();
    let h = algo_session();
    let mut s = h.lock().await;
    s.dispatch(Action::AddSubQuestion);
    let pending = prepare_variable(&mut s, Scope::Outer).unwrap();

    s.dispatch(Action::RemoveSubQuestion(0));
    assert_eq!(prepare_variable(&mut s, Scope::Outer).unwrap_err(), Error::InFlight);

    let record = finish(&mut s, pending, Ok(b.generated.clone())).unwrap();
    assert!(record.is_some());
    assert_eq!(generated_len(&s, Scope::Outer), 1);
    assert!(!s.is_generating(Scope::Outer, DetailId(0)));
  }

  #[tokio::test]
  async fn failure_appends_nothing_and_is_retryable() {
    let b = backend();
    let h = algo_session();
    b.fail_on("generate_variable");

    let err = generate_variables(&h, &b, Scope::Outer).await.unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    {
      let s = h.lock().await;
      assert_eq!(generated_len(&s, Scope::Outer), 0);
      assert!(s.state().context.open_algo().unwrap().arguments_init.is_empty());
      assert_eq!(s.last_error().unwrap().scope, Scope::Outer);
    }

    b.recover("generate_variable");
    generate_variables(&h, &b, Scope::Outer).await.unwrap();
    let s = h.lock().await;
    assert_eq!(generated_len(&s, Scope::Outer), 1);
    assert!(s.last_error().is_none());
  }

  #[tokio::test]
  async fn missing_subclass_selection_is_refused_before_the_call() {
    let b = backend();
    let mut s = Session::new(test_identity());
    edit_open_algo(&mut s, Scope::Outer, true, |a| {
      a.algo_variables = vec![VariableDescriptor {
        name: "g".into(),
        ty: "Graph".into(),
        arguments: vec![],
        subclasses: vec![
          SubclassDecl { name: "Tree".into(), arguments: vec![] },
          SubclassDecl { name: "Cycle".into(), arguments: vec![] },
        ],
      }];
      Ok(())
    })
    .unwrap();
    let h = s.into_handle();

    let err = generate_variables(&h, &b, Scope::Outer).await.unwrap_err();
    assert_eq!(err, Error::validation("select at least one subclass"));
    assert_eq!(generated_len(&*h.lock().await, Scope::Outer), 0);
    assert!(b.calls().is_empty());
  }

  #[tokio::test]
  async fn malformed_int_is_a_validation_error() {
    let b = backend();
    let h = algo_session();
    {
      let mut s = h.lock().await;
      edit_open_algo(&mut s, Scope::Outer, false, |a| {
        a.variable_arguments.insert("n".into(), BTreeMap::from([("value".to_string(), "five".to_string())]));
        Ok(())
      })
      .unwrap();
    }
    let err = generate_variables(&h, &b, Scope::Outer).await.unwrap_err();
    assert!(matches!(err, Error::Validation(m) if m.starts_with("n.value:")));
    assert!(b.calls().is_empty());
    assert!(!h.lock().await.is_generating(Scope::Outer, DetailId(0)));
  }

  #[tokio::test]
  async fn second_call_for_same_entry_is_refused_while_running() {
    let h = algo_session();
    let mut s = h.lock().await;
    let first = prepare_variable(&mut s, Scope::Outer).unwrap();
    assert_eq!(prepare_variable(&mut s, Scope::Outer).unwrap_err(), Error::InFlight);

    finish(&mut s, first, Ok(backend().generated)).unwrap();
    assert!(prepare_variable(&mut s, Scope::Outer).is_ok());
  }

  #[tokio::test]
  async fn result_for_removed_entry_is_dropped() {
    let h = algo_session();
    let mut s = h.lock().await;
    let pending = prepare_variable(&mut s, Scope::Outer).unwrap();
    remove_detail(&mut s, Scope::Outer, DetailId(0)).unwrap();

    assert_eq!(finish(&mut s, pending, Ok(backend().generated)).unwrap(), None);
    assert_eq!(generated_len(&s, Scope::Outer), 0);
  }

  #[tokio::test]
  async fn result_for_repointed_entry_is_dropped() {
    let h = algo_session();
    let mut s = h.lock().await;
    let pending = prepare_variable(&mut s, Scope::Outer).unwrap();
    edit_open_algo(&mut s, Scope::Outer, false, |a| {
      a.selected_subtopic = "merge".into();
      Ok(())
    })
    .unwrap();

    assert_eq!(finish(&mut s, pending, Ok(backend().generated)).unwrap(), None);
    assert_eq!(generated_len(&s, Scope::Outer), 0);
  }

  #[tokio::test]
  async fn sub_question_input_inherits_outer_init() {
    let b = backend();
    let mut s = Session::new(test_identity());
    add_detail(&mut s, Scope::Outer, DetailType::Input).unwrap();
    edit_open(&mut s, Scope::Outer, |k| {
      if let DetailKind::Input(i) = k {
        i.input_init.insert("ArrayInput[int]".into(), json!({"size": 3}));
      }
      Ok(())
    })
    .unwrap();
    s.dispatch(Action::AddSubQuestion);
    add_detail(&mut s, Scope::Sub(0), DetailType::Input).unwrap();
    edit_open(&mut s, Scope::Sub(0), |k| {
      *k = DetailKind::Input(InputDetails {
        input_path: vec!["arrays".into(), "ArrayInput".into()],
        input_variables: vec![int_var("size")],
        ..Default::default()
      });
      Ok(())
    })
    .unwrap();
    let h = s.into_handle();

    generate_input(&h, &b, Scope::Sub(0), true).await.unwrap();
    let sent = b.last_input_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.input_path, "arrays.ArrayInput");
    assert!(sent.input_init.unwrap().contains_key("ArrayInput[int]"));

    generate_input(&h, &b, Scope::Sub(0), false).await.unwrap();
    assert!(b.last_input_request.lock().unwrap().clone().unwrap().input_init.is_none());

    let s = h.lock().await;
    assert_eq!(generated_len(&s, Scope::Sub(0)), 2);
    assert_eq!(generated_len(&s, Scope::Outer), 0);
    assert_eq!(s.state().sub_questions[0].context.generated[0].kind, GeneratedKind::Input);
  }

  #[tokio::test]
  async fn generating_on_wrong_entry_kind_is_refused() {
    let b = backend();
    let h = algo_session();
    assert!(matches!(generate_input(&h, &b, Scope::Outer, false).await, Err(Error::Validation(_))));
    let empty = Session::new(test_identity()).into_handle();
    assert_eq!(generate_variables(&empty, &b, Scope::Outer).await.unwrap_err(), Error::NoOpenDetail);
  }
}
