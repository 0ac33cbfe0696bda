//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Applying one client command to a session
//!   - Loading the top-level catalog (topics, element types, input tree)

use tracing::{debug, instrument, warn};

use crate::aggregate;
use crate::backend::GenerationBackend;
use crate::cascade;
use crate::error::{Error, Result};
use crate::generation;
use crate::protocol::{CatalogOut, Command, CommandOut};
use crate::reducer::{Action, QuestionField, SubQuestionField};
use crate::reuse;
use crate::session::SessionHandle;

/// Apply `cmd` and return the resulting snapshot.
#[instrument(level = "info", skip(handle, backend, cmd), fields(command = cmd.name()))]
pub async fn apply_command(
  handle: &SessionHandle,
  backend: &dyn GenerationBackend,
  cmd: Command,
) -> Result<CommandOut> {
  let mut question_ids = None;
  let mut candidates = None;

  match cmd {
    Command::SetDescription { text } => {
      handle.lock().await.dispatch(Action::SetField(QuestionField::Description(text)));
    }
    Command::AddSubQuestion => handle.lock().await.dispatch(Action::AddSubQuestion),
    Command::RemoveSubQuestion { index } => {
      let mut s = handle.lock().await;
      if index >= s.state().sub_questions.len() {
        return Err(Error::UnknownSubQuestion(index));
      }
      s.dispatch(Action::RemoveSubQuestion(index));
    }
    Command::SetSubQuestionDescription { index, text } => {
      set_sub_question(handle, index, SubQuestionField::Description(text)).await?
    }
    Command::SetMarks { index, marks } => set_sub_question(handle, index, SubQuestionField::Marks(marks)).await?,
    Command::SetNumOptions { index, num_options } => {
      set_sub_question(handle, index, SubQuestionField::NumOptions(num_options)).await?
    }

    Command::AddDetail { scope, kind } => {
      cascade::add_detail(&mut *handle.lock().await, scope, kind)?;
    }
    Command::RemoveDetail { scope, detail_id } => {
      cascade::remove_detail(&mut *handle.lock().await, scope, detail_id)?;
    }

    Command::SelectTopic { scope, topic } => cascade::select_topic(handle, backend, scope, topic).await?,
    Command::SelectSubtopic { scope, subtopic } => {
      cascade::select_subtopic(handle, backend, scope, subtopic).await?
    }
    Command::SetUserAlgoCode { scope, code } => cascade::set_user_algo_code(handle, backend, scope, code).await?,
    Command::SetUserEnvCode { scope, code } => cascade::set_user_env_code(&mut *handle.lock().await, scope, code)?,
    Command::SelectSubclass { scope, variable, subclass } => {
      cascade::select_subclass(&mut *handle.lock().await, scope, &variable, &subclass)?
    }
    Command::SelectQuantifiable { scope, variable, element_type } => {
      cascade::select_quantifiable(&mut *handle.lock().await, scope, &variable, &element_type)?
    }
    Command::SetArgument { scope, variable, argument, value } => {
      cascade::set_argument(&mut *handle.lock().await, scope, &variable, &argument, value)?
    }

    Command::SetInputPath { scope, path } => {
      cascade::set_input_path(handle, backend, scope, path).await?;
    }

    Command::SelectDetail { index, detail_id } => cascade::select_detail(handle, backend, index, detail_id).await?,
    Command::SelectQueryable { index, queryable } => {
      cascade::select_queryable(handle, backend, index, queryable).await?
    }
    Command::SelectInputQueryable { index, queryable } => {
      cascade::select_input_queryable(handle, backend, index, queryable).await?
    }

    Command::GenerateVariables { scope } => {
      generation::generate_variables(handle, backend, scope).await?;
    }
    Command::GenerateInput { scope, inherit_outer } => {
      generation::generate_input(handle, backend, scope, inherit_outer).await?;
    }
    Command::UseGeneratedInput { scope, variable, source, index } => {
      reuse::use_generated_input(&mut *handle.lock().await, scope, &variable, source, index)?
    }
    Command::ReuseCandidates { scope, variable, source } => {
      candidates = Some(reuse::candidates_for(&*handle.lock().await, scope, &variable, source)?)
    }
    Command::GenerateQuestion => {
      aggregate::generate_question(handle, backend).await?;
    }
    Command::Submit { parent } => question_ids = Some(aggregate::submit(handle, backend, parent).await?),
    Command::DismissError => handle.lock().await.clear_last_error(),
    Command::Reset => handle.lock().await.dispatch(Action::Reset),
  }

  let session = handle.lock().await.snapshot();
  debug!(target: "qforge_backend", session = %session.id, "Command applied");
  Ok(CommandOut { session, question_ids, candidates })
}

async fn set_sub_question(handle: &SessionHandle, index: usize, field: SubQuestionField) -> Result<()> {
  let mut s = handle.lock().await;
  if index >= s.state().sub_questions.len() {
    return Err(Error::UnknownSubQuestion(index));
  }
  s.dispatch(Action::SetSubQuestionField { index, field });
  Ok(())
}

/// Topics, element types and the input tree, fetched concurrently. A failed
/// lookup yields an empty list.
#[instrument(level = "info", skip(backend))]
pub async fn load_catalog(backend: &dyn GenerationBackend) -> CatalogOut {
  let (topics, quantifiables, inputs) =
    tokio::join!(backend.get_topics(), backend.get_quantifiables(), backend.list_inputs());
  CatalogOut {
    topics: topics.unwrap_or_else(|e| {
      warn!(target: "cascade", error = %e, "Topic lookup failed; leaving list empty");
      vec![]
    }),
    quantifiables: quantifiables.unwrap_or_else(|e| {
      warn!(target: "cascade", error = %e, "Quantifiable lookup failed; leaving list empty");
      vec![]
    }),
    inputs: inputs.unwrap_or_else(|e| {
      warn!(target: "cascade", error = %e, "Input tree lookup failed; leaving list empty");
      vec![]
    }),
  }
}
