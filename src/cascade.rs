//! Dependent-field cascades of the context tree.
//!
//! Selector changes (topic, subtopic, user code, input path, queryables) clear
//! what depended on the previous value in one reducer step, then issue the
//! remote lookups for the new value. Each lookup holds a ticket and is applied
//! only if no newer change superseded it. Lookups of one step run concurrently
//! and fail independently: a failed lookup leaves its list empty.
//!
//! Synchronous edits (subclass, element type, raw arguments, detail list)
//! take `&mut Session`; anything that talks to the backend takes the shared
//! handle and releases the lock while waiting.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use crate::backend::GenerationBackend;
use crate::domain::{
  AlgoDetails, ContextBlock, Detail, DetailId, DetailKind, DetailType, InputDetails, Queryable,
  Scope, VariableDescriptor,
};
use crate::error::{Error, Result};
use crate::reducer::{Action, ContextField, SubQuestionField};
use crate::session::{FetchKind, Session, SessionHandle, Ticket};

// ---------------------------------------------------------------------------
// Detail list helpers
// ---------------------------------------------------------------------------

pub(crate) fn context_of(session: &Session, scope: Scope) -> Result<&ContextBlock> {
  session.state().context(scope).ok_or(match scope {
    Scope::Sub(i) => Error::UnknownSubQuestion(i),
    Scope::Outer => Error::NoOpenDetail,
  })
}

fn sub_question_count(session: &Session) -> usize {
  session.state().sub_questions.len()
}

/// Edit the open algo entry of `scope`. With `create`, a fresh algo entry is
/// appended when the open entry is missing or of the other kind.
pub(crate) fn edit_open_algo(
  session: &mut Session,
  scope: Scope,
  create: bool,
  f: impl FnOnce(&mut AlgoDetails) -> Result<()>,
) -> Result<DetailId> {
  let ctx = context_of(session, scope)?;
  let mut details = ctx.details.clone();
  let mut next = ctx.next_detail_id;
  let start_next = next;

  if !matches!(details.last(), Some(Detail { kind: DetailKind::Algo(_), .. })) {
    if !create {
      return Err(Error::NoOpenDetail);
    }
    details.push(Detail { id: DetailId(next), kind: DetailKind::Algo(AlgoDetails::default()) });
    next += 1;
  }
  let Some(Detail { id, kind: DetailKind::Algo(algo) }) = details.last_mut() else {
    return Err(Error::NoOpenDetail);
  };
  f(algo)?;
  let id = *id;

  session.dispatch(Action::details(scope, details));
  if next != start_next {
    session.dispatch(Action::context(scope, ContextField::NextDetailId(next)));
  }
  Ok(id)
}

/// Edit the open entry of `scope`, whatever its kind.
pub(crate) fn edit_open(
  session: &mut Session,
  scope: Scope,
  f: impl FnOnce(&mut DetailKind) -> Result<()>,
) -> Result<DetailId> {
  let mut details = context_of(session, scope)?.details.clone();
  let Some(open) = details.last_mut() else {
    return Err(Error::NoOpenDetail);
  };
  f(&mut open.kind)?;
  let id = open.id;
  session.dispatch(Action::details(scope, details));
  Ok(id)
}

/// Edit one entry by id. Returns false if the entry no longer exists.
pub(crate) fn edit_detail(
  session: &mut Session,
  scope: Scope,
  id: DetailId,
  f: impl FnOnce(&mut DetailKind),
) -> bool {
  let Ok(ctx) = context_of(session, scope) else {
    return false;
  };
  let mut details = ctx.details.clone();
  let Some(detail) = details.iter_mut().find(|d| d.id == id) else {
    return false;
  };
  f(&mut detail.kind);
  session.dispatch(Action::details(scope, details));
  true
}

/// Drop selections, arguments and bindings of variables that are gone.
fn prune_to_variables(algo: &mut AlgoDetails) {
  let names: Vec<String> = algo.algo_variables.iter().map(|v| v.name.clone()).collect();
  let keep = |k: &String| names.contains(k);
  algo.selected_quantifiables.retain(|k, _| keep(k));
  algo.selected_subclasses.retain(|k, _| keep(k));
  algo.variable_arguments.retain(|k, _| keep(k));
  algo.arguments_init.retain(|k, _| keep(k));
  algo.reuse.retain(|k, _| keep(k));
}

/// Every sub-question loses its queryable pick (outer context changed under it).
fn clear_sub_question_queryables(session: &mut Session) {
  for index in 0..sub_question_count(session) {
    session.dispatch(Action::SetSubQuestionField {
      index,
      field: SubQuestionField::SelectedQueryable(String::new()),
    });
    session.dispatch(Action::SetSubQuestionField {
      index,
      field: SubQuestionField::QueryVariables(vec![]),
    });
    session.invalidate(Scope::Sub(index), FetchKind::QueryVariables);
  }
}

/// Apply `f` if the ticket survived until the response landed.
async fn land(handle: &SessionHandle, ticket: Ticket, what: &'static str, f: impl FnOnce(&mut Session)) -> bool {
  let mut session = handle.lock().await;
  if !session.is_current(&ticket) {
    debug!(target: "cascade", what, "Dropping superseded response");
    return false;
  }
  f(&mut *session);
  true
}

// ---------------------------------------------------------------------------
// Algo binding: topic / subtopic / user code
// ---------------------------------------------------------------------------

/// Where the variable and queryable lists of an algo entry come from.
#[derive(Clone, Debug)]
struct AlgoSource {
  topic: String,
  subtopic: String,
  user_code: String,
}

impl AlgoSource {
  fn of(algo: &AlgoDetails) -> Self {
    Self {
      topic: algo.selected_topic.clone(),
      subtopic: algo.selected_subtopic.clone(),
      user_code: algo.user_algo_code.clone(),
    }
  }

  fn uses_code(&self) -> bool {
    !self.user_code.trim().is_empty()
  }

  fn has_pair(&self) -> bool {
    !self.topic.is_empty() && !self.subtopic.is_empty()
  }

  async fn variables(&self, backend: &dyn GenerationBackend) -> Result<Vec<VariableDescriptor>> {
    if self.uses_code() {
      backend.get_user_algo_variables(&self.user_code).await
    } else if self.has_pair() {
      backend.get_algo_variables(&self.topic, &self.subtopic).await
    } else {
      Ok(vec![])
    }
  }

  async fn queryables(&self, backend: &dyn GenerationBackend) -> Result<Vec<Queryable>> {
    if self.uses_code() {
      backend.get_user_queryables(&self.user_code).await
    } else if self.has_pair() {
      backend.get_queryables(&self.topic, &self.subtopic).await
    } else {
      Ok(vec![])
    }
  }
}

struct AlgoTickets {
  variables: Ticket,
  queryables: Ticket,
  quantifiables: Option<Ticket>,
}

/// Fetch variables, queryables and (optionally) element types concurrently and
/// land each one on its own.
async fn fetch_algo_lists(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  detail: DetailId,
  source: AlgoSource,
  tickets: AlgoTickets,
) {
  let variables = async {
    let res = source.variables(backend).await;
    land(handle, tickets.variables, "algo_variables", |s| {
      let vars = res.unwrap_or_else(|e| {
        warn!(target: "cascade", ?scope, error = %e, "Variable lookup failed; leaving list empty");
        vec![]
      });
      edit_detail(s, scope, detail, |kind| {
        if let DetailKind::Algo(a) = kind {
          a.algo_variables = vars;
          prune_to_variables(a);
        }
      });
    })
    .await;
  };

  let queryables = async {
    let res = source.queryables(backend).await;
    land(handle, tickets.queryables, "queryables", |s| match res {
      Ok(q) => s.dispatch(Action::context(scope, ContextField::Queryables(q))),
      Err(e) => {
        warn!(target: "cascade", ?scope, error = %e, "Queryable lookup failed; clearing queryable selections");
        s.dispatch(Action::context(scope, ContextField::Queryables(vec![])));
        if scope == Scope::Outer {
          clear_sub_question_queryables(s);
        }
      }
    })
    .await;
  };

  let quantifiables = async {
    if let Some(ticket) = tickets.quantifiables {
      let res = backend.get_quantifiables().await;
      land(handle, ticket, "quantifiables", |s| {
        let q = res.unwrap_or_else(|e| {
          warn!(target: "cascade", ?scope, error = %e, "Quantifiable lookup failed; leaving list empty");
          vec![]
        });
        s.dispatch(Action::context(scope, ContextField::Quantifiables(q)));
      })
      .await;
    }
  };

  tokio::join!(variables, queryables, quantifiables);
}

/// Topic change: clears the subtopic and everything derived from it, then
/// loads the subtopics of the new topic.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn select_topic(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  topic: String,
) -> Result<()> {
  let ticket = {
    let mut s = handle.lock().await;
    edit_open_algo(&mut s, scope, true, |a| {
      a.selected_topic = topic.clone();
      a.selected_subtopic.clear();
      a.clear_derived();
      Ok(())
    })?;
    s.dispatch(Action::context(scope, ContextField::Subtopics(vec![])));
    s.dispatch(Action::context(scope, ContextField::Queryables(vec![])));
    s.invalidate(scope, FetchKind::AlgoVariables);
    s.invalidate(scope, FetchKind::Queryables);
    if scope == Scope::Outer {
      clear_sub_question_queryables(&mut s);
    }
    s.issue(scope, FetchKind::Subtopics)
  };

  if topic.is_empty() {
    return Ok(());
  }
  let res = backend.get_subtopics(&topic).await;
  land(handle, ticket, "subtopics", |s| {
    let subtopics = res.unwrap_or_else(|e| {
      warn!(target: "cascade", ?scope, %topic, error = %e, "Subtopic lookup failed; leaving list empty");
      vec![]
    });
    s.dispatch(Action::context(scope, ContextField::Subtopics(subtopics)));
  })
  .await;
  Ok(())
}

/// Subtopic change (including clearing it). Selections never carry across
/// subtopics; on the outer context every sub-question's queryable pick is
/// dropped as well.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn select_subtopic(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  subtopic: String,
) -> Result<()> {
  let (detail, source, tickets) = {
    let mut s = handle.lock().await;
    let mut source = None;
    let detail = edit_open_algo(&mut s, scope, true, |a| {
      a.selected_subtopic = subtopic.clone();
      a.clear_derived();
      source = Some(AlgoSource::of(a));
      Ok(())
    })?;
    if scope == Scope::Outer {
      clear_sub_question_queryables(&mut s);
    }
    let tickets = AlgoTickets {
      variables: s.issue(scope, FetchKind::AlgoVariables),
      queryables: s.issue(scope, FetchKind::Queryables),
      quantifiables: Some(s.issue(scope, FetchKind::Quantifiables)),
    };
    (detail, source.ok_or(Error::NoOpenDetail)?, tickets)
  };

  info!(target: "cascade", ?scope, topic = %source.topic, %subtopic, from_code = source.uses_code(), "Subtopic changed");
  fetch_algo_lists(handle, backend, scope, detail, source, tickets).await;
  Ok(())
}

/// User algorithm code replaces the topic-derived variable and queryable lists
/// with the ones introspected from the code. Clearing the code goes back to
/// the topic/subtopic lists.
#[instrument(level = "info", skip(handle, backend, code), fields(code_len = code.len()), target = "cascade")]
pub async fn set_user_algo_code(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  code: String,
) -> Result<()> {
  let (detail, source, tickets) = {
    let mut s = handle.lock().await;
    let mut source = None;
    let detail = edit_open_algo(&mut s, scope, true, |a| {
      a.user_algo_code = code.clone();
      source = Some(AlgoSource::of(a));
      Ok(())
    })?;
    let tickets = AlgoTickets {
      variables: s.issue(scope, FetchKind::AlgoVariables),
      queryables: s.issue(scope, FetchKind::Queryables),
      quantifiables: None,
    };
    (detail, source.ok_or(Error::NoOpenDetail)?, tickets)
  };

  fetch_algo_lists(handle, backend, scope, detail, source, tickets).await;
  Ok(())
}

pub fn set_user_env_code(session: &mut Session, scope: Scope, code: String) -> Result<()> {
  context_of(session, scope)?;
  session.dispatch(Action::context(scope, ContextField::UserEnvCode(code)));
  Ok(())
}

// ---------------------------------------------------------------------------
// Per-variable edits
// ---------------------------------------------------------------------------

/// Choose (or clear, with an empty name) the subclass of a polymorphic
/// variable. The variable's arguments are re-seeded with empty placeholders
/// for the subclass's declared arguments.
pub fn select_subclass(session: &mut Session, scope: Scope, variable: &str, subclass: &str) -> Result<()> {
  edit_open_algo(session, scope, false, |a| {
    if a.reuse.contains_key(variable) {
      return Err(Error::ReuseActive(variable.to_string()));
    }
    let var = a
      .variable(variable)
      .ok_or_else(|| Error::validation(format!("unknown variable '{variable}'")))?;

    if subclass.is_empty() {
      a.selected_subclasses.remove(variable);
      a.variable_arguments.remove(variable);
      return Ok(());
    }
    let decl = var
      .subclass(subclass)
      .ok_or_else(|| Error::validation(format!("'{subclass}' is not a subclass of '{variable}'")))?;
    let placeholders: BTreeMap<String, String> =
      decl.arguments.iter().map(|arg| (arg.name.clone(), String::new())).collect();

    a.selected_subclasses.insert(variable.to_string(), subclass.to_string());
    a.variable_arguments.insert(variable.to_string(), placeholders);
    Ok(())
  })?;
  Ok(())
}

/// Element type annotation for a quantifiable variable of the open entry.
pub fn select_quantifiable(session: &mut Session, scope: Scope, variable: &str, element_type: &str) -> Result<()> {
  let known = context_of(session, scope)?.quantifiables.clone();
  if !element_type.is_empty() && !known.is_empty() && !known.iter().any(|q| q == element_type) {
    return Err(Error::validation(format!("'{element_type}' is not a known element type")));
  }
  edit_open(session, scope, |kind| {
    let (has_var, selections) = match kind {
      DetailKind::Algo(a) => (a.variable(variable).is_some(), &mut a.selected_quantifiables),
      DetailKind::Input(i) => (i.variable(variable).is_some(), &mut i.selected_quantifiables),
    };
    if !has_var {
      return Err(Error::validation(format!("unknown variable '{variable}'")));
    }
    if element_type.is_empty() {
      selections.remove(variable);
    } else {
      selections.insert(variable.to_string(), element_type.to_string());
    }
    Ok(())
  })?;
  Ok(())
}

/// Manual entry of one raw argument on the open entry. Refused while the
/// variable is bound to a generated input.
pub fn set_argument(session: &mut Session, scope: Scope, variable: &str, argument: &str, value: String) -> Result<()> {
  edit_open(session, scope, |kind| {
    let (has_var, reused, args) = match kind {
      DetailKind::Algo(a) => (
        a.variable(variable).is_some(),
        a.reuse.contains_key(variable),
        &mut a.variable_arguments,
      ),
      DetailKind::Input(i) => (
        i.variable(variable).is_some(),
        i.reuse.contains_key(variable),
        &mut i.input_variable_arguments,
      ),
    };
    if !has_var {
      return Err(Error::validation(format!("unknown variable '{variable}'")));
    }
    if reused {
      return Err(Error::ReuseActive(variable.to_string()));
    }
    let mut replacement = args.get(variable).cloned().unwrap_or_default();
    replacement.insert(argument.to_string(), value);
    args.insert(variable.to_string(), replacement);
    Ok(())
  })?;
  Ok(())
}

// ---------------------------------------------------------------------------
// Detail list
// ---------------------------------------------------------------------------

/// Append a new empty entry; it becomes the open one.
pub fn add_detail(session: &mut Session, scope: Scope, kind: DetailType) -> Result<DetailId> {
  let ctx = context_of(session, scope)?;
  let id = DetailId(ctx.next_detail_id);
  let mut details = ctx.details.clone();
  details.push(Detail {
    id,
    kind: match kind {
      DetailType::Algo => DetailKind::Algo(AlgoDetails::default()),
      DetailType::Input => DetailKind::Input(InputDetails::default()),
    },
  });
  session.dispatch(Action::details(scope, details));
  session.dispatch(Action::context(scope, ContextField::NextDetailId(id.0 + 1)));
  Ok(id)
}

/// Remove an entry. Sub-questions pointing at a removed outer entry lose the
/// pointer and their queryable picks. Generated records stay.
pub fn remove_detail(session: &mut Session, scope: Scope, id: DetailId) -> Result<()> {
  let ctx = context_of(session, scope)?;
  if ctx.detail(id).is_none() {
    return Err(Error::UnknownDetail(id.0));
  }
  let details: Vec<Detail> = ctx.details.iter().filter(|d| d.id != id).cloned().collect();
  session.dispatch(Action::details(scope, details));
  session.invalidate(scope, FetchKind::Generation(id));

  if scope == Scope::Outer {
    let pointing: Vec<usize> = session
      .state()
      .sub_questions
      .iter()
      .enumerate()
      .filter(|(_, sq)| sq.context.selected_detail == Some(id))
      .map(|(i, _)| i)
      .collect();
    for index in pointing {
      session.dispatch(Action::SetSubQuestionContextField { index, field: ContextField::SelectedDetail(None) });
      reset_sub_question_queries(session, index, true);
    }
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Input binding
// ---------------------------------------------------------------------------

/// Input-path change. A pristine open entry (no typed arguments, no init) is
/// overwritten in place; anything else is preserved and a new entry appended.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn set_input_path(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  scope: Scope,
  path: Vec<String>,
) -> Result<DetailId> {
  let (detail, ticket) = {
    let mut s = handle.lock().await;
    let ctx = context_of(&s, scope)?;
    let mut details = ctx.details.clone();
    let fresh = DetailKind::Input(InputDetails { input_path: path.clone(), ..Default::default() });

    let id = match details.last_mut() {
      Some(last) if last.is_pristine() => {
        last.kind = fresh;
        last.id
      }
      _ => {
        let id = DetailId(ctx.next_detail_id);
        details.push(Detail { id, kind: fresh });
        s.dispatch(Action::context(scope, ContextField::NextDetailId(id.0 + 1)));
        id
      }
    };
    s.dispatch(Action::details(scope, details));
    (id, s.issue(scope, FetchKind::InputVariables))
  };

  let path_str = path.join(".");
  let res = if path.is_empty() {
    Ok(vec![])
  } else {
    backend.list_input_variables(&path_str).await
  };
  land(handle, ticket, "input_variables", |s| {
    let vars = res.unwrap_or_else(|e| {
      warn!(target: "cascade", ?scope, input_path = %path_str, error = %e, "Input variable lookup failed; leaving list empty");
      vec![]
    });
    edit_detail(s, scope, detail, |kind| {
      if let DetailKind::Input(i) = kind {
        i.input_variables = vars;
      }
    });
  })
  .await;
  Ok(detail)
}

// ---------------------------------------------------------------------------
// Sub-question query selection
// ---------------------------------------------------------------------------

fn check_sub_question(session: &Session, index: usize) -> Result<()> {
  if index < sub_question_count(session) {
    Ok(())
  } else {
    Err(Error::UnknownSubQuestion(index))
  }
}

fn reset_sub_question_queries(session: &mut Session, index: usize, with_candidates: bool) {
  let mut fields = vec![
    SubQuestionField::SelectedQueryable(String::new()),
    SubQuestionField::QueryVariables(vec![]),
    SubQuestionField::SelectedInputQueryable(String::new()),
    SubQuestionField::InputQueryVariables(vec![]),
  ];
  if with_candidates {
    fields.push(SubQuestionField::Queryables(vec![]));
    fields.push(SubQuestionField::InputQueryables(vec![]));
  }
  for field in fields {
    session.dispatch(Action::SetSubQuestionField { index, field });
  }
  session.invalidate(Scope::Sub(index), FetchKind::QueryVariables);
}

/// The outer entry a sub-question queries, if one is selected.
fn selected_outer_detail(session: &Session, index: usize) -> Option<Detail> {
  let sq = session.state().sub_questions.get(index)?;
  let id = sq.context.selected_detail?;
  session.state().context.detail(id).cloned()
}

fn latest_outer_algo(session: &Session) -> Option<&AlgoDetails> {
  session.state().context.details.iter().rev().find_map(Detail::as_algo)
}

/// Point a sub-question at an outer entry and load that entry's queryables.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn select_detail(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  index: usize,
  detail: Option<DetailId>,
) -> Result<()> {
  let (target, ticket) = {
    let mut s = handle.lock().await;
    check_sub_question(&s, index)?;
    let target = match detail {
      Some(id) => Some(s.state().context.detail(id).cloned().ok_or(Error::UnknownDetail(id.0))?),
      None => None,
    };
    s.dispatch(Action::SetSubQuestionContextField { index, field: ContextField::SelectedDetail(detail) });
    reset_sub_question_queries(&mut s, index, true);
    (target, s.issue(Scope::Sub(index), FetchKind::SubQuestionQueryables))
  };

  let Some(target) = target else {
    return Ok(());
  };
  match target.kind {
    DetailKind::Algo(algo) => {
      let res = AlgoSource::of(&algo).queryables(backend).await;
      land(handle, ticket, "sub_question_queryables", |s| {
        let q = res.unwrap_or_else(|e| {
          warn!(target: "cascade", index, error = %e, "Queryable lookup failed; leaving list empty");
          vec![]
        });
        s.dispatch(Action::SetSubQuestionField { index, field: SubQuestionField::Queryables(q) });
      })
      .await;
    }
    DetailKind::Input(input) => {
      let res = backend.get_input_queryables(&input.path_string()).await;
      land(handle, ticket, "sub_question_input_queryables", |s| {
        let q = res.unwrap_or_else(|e| {
          warn!(target: "cascade", index, error = %e, "Input queryable lookup failed; leaving list empty");
          vec![]
        });
        s.dispatch(Action::SetSubQuestionField { index, field: SubQuestionField::InputQueryables(q) });
      })
      .await;
    }
  }
  Ok(())
}

/// Pick a normal queryable; clears the input queryable and its variables.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn select_queryable(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  index: usize,
  queryable: String,
) -> Result<()> {
  let (source, ticket) = {
    let mut s = handle.lock().await;
    check_sub_question(&s, index)?;
    let selected = selected_outer_detail(&s, index);
    if !queryable.is_empty() && selected.as_ref().is_some_and(|d| d.as_input().is_some()) {
      return Err(Error::validation("the selected context entry is an input; pick an input queryable instead"));
    }
    reset_sub_question_queries(&mut s, index, false);
    s.dispatch(Action::SetSubQuestionField {
      index,
      field: SubQuestionField::SelectedQueryable(queryable.clone()),
    });
    // without a selected entry the outer context's latest algorithm applies
    let source = match &selected {
      Some(d) => d.as_algo().map(AlgoSource::of),
      None => latest_outer_algo(&s).map(AlgoSource::of),
    };
    (source, s.issue(Scope::Sub(index), FetchKind::QueryVariables))
  };

  let Some(source) = source.filter(|src| src.has_pair() && !queryable.is_empty()) else {
    return Ok(());
  };
  let res = backend.get_variables(&source.topic, &source.subtopic, &queryable).await;
  land(handle, ticket, "query_variables", |s| {
    let vars = res.unwrap_or_else(|e| {
      warn!(target: "cascade", index, %queryable, error = %e, "Query variable lookup failed; leaving list empty");
      vec![]
    });
    s.dispatch(Action::SetSubQuestionField { index, field: SubQuestionField::QueryVariables(vars) });
  })
  .await;
  Ok(())
}

/// Pick an input queryable; clears the normal queryable and its variables.
#[instrument(level = "info", skip(handle, backend), target = "cascade")]
pub async fn select_input_queryable(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  index: usize,
  queryable: String,
) -> Result<()> {
  let (path, ticket) = {
    let mut s = handle.lock().await;
    check_sub_question(&s, index)?;
    let path = match selected_outer_detail(&s, index) {
      Some(Detail { kind: DetailKind::Input(i), .. }) => i.path_string(),
      _ if queryable.is_empty() => String::new(),
      _ => return Err(Error::validation("select an input context entry before an input queryable")),
    };
    reset_sub_question_queries(&mut s, index, false);
    s.dispatch(Action::SetSubQuestionField {
      index,
      field: SubQuestionField::SelectedInputQueryable(queryable.clone()),
    });
    (path, s.issue(Scope::Sub(index), FetchKind::QueryVariables))
  };

  if queryable.is_empty() {
    return Ok(());
  }
  let res = backend.get_input_queryable_variables(&path, &queryable).await;
  land(handle, ticket, "input_query_variables", |s| {
    let vars = res.unwrap_or_else(|e| {
      warn!(target: "cascade", index, %queryable, error = %e, "Input query variable lookup failed; leaving list empty");
      vec![]
    });
    s.dispatch(Action::SetSubQuestionField { index, field: SubQuestionField::InputQueryVariables(vars) });
  })
  .await;
  Ok(())
}
