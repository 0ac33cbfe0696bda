//! State transition function of the question draft.
//!
//! `reduce` is total and side-effect free. Each "set" action replaces exactly
//! one field; composite fields (the detail list, argument maps) are always
//! passed as complete replacement values. Validation lives in the callers.

use crate::domain::{
  ContextBlock, Detail, GeneratedContext, QuestionBlock, QuestionCreationItem, Queryable, Scope,
  SubQuestion, Subtopic, VariableDescriptor, DetailId,
};

#[derive(Clone, Debug, PartialEq)]
pub enum QuestionField {
  Description(String),
  Loading(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContextField {
  Details(Vec<Detail>),
  NextDetailId(u64),
  Subtopics(Vec<Subtopic>),
  Quantifiables(Vec<String>),
  Queryables(Vec<Queryable>),
  UserEnvCode(String),
  SelectedDetail(Option<DetailId>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubQuestionField {
  Description(String),
  Marks(u32),
  NumOptions(u32),
  Queryables(Vec<Queryable>),
  InputQueryables(Vec<Queryable>),
  SelectedQueryable(String),
  QueryVariables(Vec<VariableDescriptor>),
  SelectedInputQueryable(String),
  InputQueryVariables(Vec<VariableDescriptor>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
  SetField(QuestionField),
  SetContextField(ContextField),
  SetSubQuestionField { index: usize, field: SubQuestionField },
  SetSubQuestionContextField { index: usize, field: ContextField },
  AddSubQuestion,
  RemoveSubQuestion(usize),
  SetGeneratedQuestions(Vec<QuestionCreationItem>),
  AppendGeneratedContext { scope: Scope, record: GeneratedContext },
  Reset,
}

impl Action {
  /// Context field action addressed by scope.
  pub fn context(scope: Scope, field: ContextField) -> Self {
    match scope {
      Scope::Outer => Action::SetContextField(field),
      Scope::Sub(index) => Action::SetSubQuestionContextField { index, field },
    }
  }

  pub fn details(scope: Scope, details: Vec<Detail>) -> Self {
    Action::context(scope, ContextField::Details(details))
  }
}

pub fn reduce(mut state: QuestionBlock, action: Action) -> QuestionBlock {
  match action {
    Action::SetField(QuestionField::Description(d)) => state.description = d,
    Action::SetField(QuestionField::Loading(l)) => state.loading = l,
    Action::SetContextField(field) => apply_context_field(&mut state.context, field),
    Action::SetSubQuestionField { index, field } => {
      if let Some(sq) = state.sub_questions.get_mut(index) {
        apply_sub_question_field(sq, field);
      }
    }
    Action::SetSubQuestionContextField { index, field } => {
      if let Some(sq) = state.sub_questions.get_mut(index) {
        apply_context_field(&mut sq.context, field);
      }
    }
    Action::AddSubQuestion => state.sub_questions.push(SubQuestion::default()),
    Action::RemoveSubQuestion(index) => {
      if index < state.sub_questions.len() {
        state.sub_questions.remove(index);
      }
    }
    Action::SetGeneratedQuestions(items) => state.generated_questions = items,
    Action::AppendGeneratedContext { scope, record } => {
      let ctx = match scope {
        Scope::Outer => Some(&mut state.context),
        Scope::Sub(i) => state.sub_questions.get_mut(i).map(|s| &mut s.context),
      };
      if let Some(ctx) = ctx {
        ctx.generated.push(record);
      }
    }
    Action::Reset => state = QuestionBlock::default(),
  }
  state
}

fn apply_context_field(ctx: &mut ContextBlock, field: ContextField) {
  match field {
    ContextField::Details(d) => ctx.details = d,
    ContextField::NextDetailId(n) => ctx.next_detail_id = n,
    ContextField::Subtopics(s) => ctx.subtopics = s,
    ContextField::Quantifiables(q) => ctx.quantifiables = q,
    ContextField::Queryables(q) => ctx.queryables = q,
    ContextField::UserEnvCode(c) => ctx.user_env_code = c,
    ContextField::SelectedDetail(d) => ctx.selected_detail = d,
  }
}

fn apply_sub_question_field(sq: &mut SubQuestion, field: SubQuestionField) {
  match field {
    SubQuestionField::Description(d) => sq.description = d,
    SubQuestionField::Marks(m) => sq.marks = m,
    SubQuestionField::NumOptions(n) => sq.num_options = n,
    SubQuestionField::Queryables(q) => sq.queryables = q,
    SubQuestionField::InputQueryables(q) => sq.input_queryables = q,
    SubQuestionField::SelectedQueryable(q) => sq.selected_queryable = q,
    SubQuestionField::QueryVariables(v) => sq.query_variables = v,
    SubQuestionField::SelectedInputQueryable(q) => sq.selected_input_queryable = q,
    SubQuestionField::InputQueryVariables(v) => sq.input_query_variables = v,
  }
}
