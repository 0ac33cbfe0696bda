//! Domain model of a question draft: contexts, their detail entries, generated
//! context records and sub-questions.
//!
//! Everything here is plain data. Transitions go through `reducer::reduce`;
//! the cascade, generation and reuse modules compute replacement values and
//! dispatch them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raw user input: variable -> argument -> text as typed.
pub type RawArguments = BTreeMap<String, BTreeMap<String, String>>;

/// Which context of the draft an operation addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
  /// The question-level context.
  Outer,
  /// The context of the sub-question at this index.
  Sub(usize),
}

// ---------------------------------------------------------------------------
// Remote catalog shapes (consumed, not owned)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

pub type Subtopic = Topic;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Queryable {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// Node of the input-class namespace returned by `listInputs`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputNode {
  pub name: String,
  #[serde(default)]
  pub children: Vec<InputNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDecl {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubclassDecl {
  pub name: String,
  #[serde(default)]
  pub arguments: Vec<ArgumentDecl>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
  pub name: String,
  #[serde(rename = "type")]
  pub ty: String,
  #[serde(default)]
  pub arguments: Vec<ArgumentDecl>,
  #[serde(default)]
  pub subclasses: Vec<SubclassDecl>,
}

impl VariableDescriptor {
  pub fn declares_subclasses(&self) -> bool {
    !self.subclasses.is_empty()
  }

  pub fn subclass(&self, name: &str) -> Option<&SubclassDecl> {
    self.subclasses.iter().find(|s| s.name == name)
  }

  /// Declared arguments given the chosen subclass (if any).
  pub fn arguments_for(&self, subclass: Option<&str>) -> &[ArgumentDecl] {
    match subclass.and_then(|s| self.subclass(s)) {
      Some(sc) => &sc.arguments,
      None => &self.arguments,
    }
  }

  /// Declared type of one argument; `None` if the argument is not declared.
  pub fn argument_type(&self, subclass: Option<&str>, argument: &str) -> Option<&str> {
    self
      .arguments_for(subclass)
      .iter()
      .find(|a| a.name == argument)
      .map(|a| a.ty.as_str())
  }
}

// ---------------------------------------------------------------------------
// Context tree
// ---------------------------------------------------------------------------

/// Stable handle of a Detail inside its owning context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetailId(pub u64);

/// Which generated-context list a reuse binding points into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseSource {
  /// The same context's generated list.
  Local,
  /// The enclosing question context's list (sub-question "inner input" view).
  Outer,
}

/// A variable currently satisfied by a previously generated input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReuseBinding {
  pub source: ReuseSource,
  pub index: usize,
  /// Id of the referenced record, kept so a stale index is detectable.
  pub generated_id: Uuid,
  /// Init snapshot of the referenced entry, sent as `arguments_init`.
  pub init: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgoDetails {
  #[serde(default)]
  pub selected_topic: String,
  #[serde(default)]
  pub selected_subtopic: String,
  #[serde(default)]
  pub algo_variables: Vec<VariableDescriptor>,
  #[serde(default)]
  pub selected_quantifiables: BTreeMap<String, String>,
  #[serde(default)]
  pub selected_subclasses: BTreeMap<String, String>,
  #[serde(default)]
  pub variable_arguments: RawArguments,
  #[serde(default)]
  pub arguments_init: BTreeMap<String, Value>,
  #[serde(default)]
  pub user_algo_code: String,
  #[serde(default)]
  pub reuse: BTreeMap<String, ReuseBinding>,
}

impl AlgoDetails {
  pub fn variable(&self, name: &str) -> Option<&VariableDescriptor> {
    self.algo_variables.iter().find(|v| v.name == name)
  }

  /// Drops everything derived from the topic/subtopic pair in one step.
  pub fn clear_derived(&mut self) {
    self.algo_variables.clear();
    self.selected_quantifiables.clear();
    self.selected_subclasses.clear();
    self.variable_arguments.clear();
    self.arguments_init.clear();
    self.reuse.clear();
  }

  pub fn is_pristine(&self) -> bool {
    !has_user_arguments(&self.variable_arguments) && self.arguments_init.is_empty()
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDetails {
  #[serde(default)]
  pub input_path: Vec<String>,
  #[serde(default)]
  pub input_variables: Vec<VariableDescriptor>,
  #[serde(default)]
  pub input_variable_arguments: RawArguments,
  #[serde(default)]
  pub input_init: BTreeMap<String, Value>,
  #[serde(default)]
  pub selected_quantifiables: BTreeMap<String, String>,
  #[serde(default)]
  pub reuse: BTreeMap<String, ReuseBinding>,
}

impl InputDetails {
  pub fn variable(&self, name: &str) -> Option<&VariableDescriptor> {
    self.input_variables.iter().find(|v| v.name == name)
  }

  /// Dotted wire form of the hierarchical input path.
  pub fn path_string(&self) -> String {
    self.input_path.join(".")
  }

  pub fn is_pristine(&self) -> bool {
    !has_user_arguments(&self.input_variable_arguments) && self.input_init.is_empty()
  }
}

/// True if at least one argument holds non-empty text. Placeholders seeded by a
/// subclass choice do not count as user input.
fn has_user_arguments(args: &RawArguments) -> bool {
  args.values().flat_map(|m| m.values()).any(|v| !v.is_empty())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetailKind {
  Algo(AlgoDetails),
  Input(InputDetails),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detail {
  pub id: DetailId,
  #[serde(flatten)]
  pub kind: DetailKind,
}

impl Detail {
  pub fn as_algo(&self) -> Option<&AlgoDetails> {
    match &self.kind {
      DetailKind::Algo(a) => Some(a),
      DetailKind::Input(_) => None,
    }
  }

  pub fn as_input(&self) -> Option<&InputDetails> {
    match &self.kind {
      DetailKind::Input(i) => Some(i),
      DetailKind::Algo(_) => None,
    }
  }

  /// No user-entered arguments and no init snapshot yet.
  pub fn is_pristine(&self) -> bool {
    match &self.kind {
      DetailKind::Algo(a) => a.is_pristine(),
      DetailKind::Input(i) => i.is_pristine(),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailType {
  Algo,
  Input,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
  #[serde(default)]
  pub details: Vec<Detail>,
  #[serde(default)]
  pub next_detail_id: u64,
  #[serde(default)]
  pub subtopics: Vec<Subtopic>,
  #[serde(default)]
  pub quantifiables: Vec<String>,
  #[serde(default)]
  pub queryables: Vec<Queryable>,
  #[serde(default)]
  pub user_env_code: String,
  /// Sub-question contexts only: the outer Detail this sub-question queries.
  #[serde(default)]
  pub selected_detail: Option<DetailId>,
  #[serde(default)]
  pub generated: Vec<GeneratedContext>,
}

impl ContextBlock {
  /// The entry currently being edited.
  pub fn open_detail(&self) -> Option<&Detail> {
    self.details.last()
  }

  pub fn open_algo(&self) -> Option<&AlgoDetails> {
    self.open_detail().and_then(Detail::as_algo)
  }

  pub fn open_input(&self) -> Option<&InputDetails> {
    self.open_detail().and_then(Detail::as_input)
  }

  pub fn detail(&self, id: DetailId) -> Option<&Detail> {
    self.details.iter().find(|d| d.id == id)
  }

  /// Most recent input entry that already carries an init snapshot.
  pub fn latest_input_init(&self) -> Option<&BTreeMap<String, Value>> {
    self
      .details
      .iter()
      .rev()
      .filter_map(Detail::as_input)
      .map(|i| &i.input_init)
      .find(|init| !init.is_empty())
  }
}

// ---------------------------------------------------------------------------
// Generated contexts
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKind {
  Input,
  Algo,
}

/// Result of one successful generation call. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContext {
  pub id: Uuid,
  #[serde(rename = "type")]
  pub kind: GeneratedKind,
  pub detail_id: DetailId,
  #[serde(default)]
  pub context: BTreeMap<String, Value>,
  #[serde(default)]
  pub context_init: BTreeMap<String, Value>,
  #[serde(default)]
  pub has_output: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
}

impl GeneratedContext {
  /// Key of the recorded init snapshot (the generated input's type name).
  pub fn init_key(&self) -> Option<&str> {
    self.context_init.keys().next().map(String::as_str)
  }
}

// ---------------------------------------------------------------------------
// Question draft
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub context: ContextBlock,
  pub marks: u32,
  pub num_options: u32,
  #[serde(default)]
  pub queryables: Vec<Queryable>,
  #[serde(default)]
  pub input_queryables: Vec<Queryable>,
  #[serde(default)]
  pub selected_queryable: String,
  #[serde(default)]
  pub query_variables: Vec<VariableDescriptor>,
  #[serde(default)]
  pub selected_input_queryable: String,
  #[serde(default)]
  pub input_query_variables: Vec<VariableDescriptor>,
}

impl Default for SubQuestion {
  fn default() -> Self {
    Self {
      description: String::new(),
      context: ContextBlock::default(),
      marks: 1,
      num_options: 4,
      queryables: vec![],
      input_queryables: vec![],
      selected_queryable: String::new(),
      query_variables: vec![],
      selected_input_queryable: String::new(),
      input_query_variables: vec![],
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  MultipleChoice,
  TrueFalse,
  OpenEnded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
  pub text: String,
  #[serde(default)]
  pub is_correct: bool,
}

/// One question produced by `generateQuestion`, ready for persistence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionCreationItem {
  pub description: String,
  pub question_type: QuestionType,
  #[serde(default)]
  pub options: Vec<AnswerOption>,
  #[serde(default)]
  pub marks: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub answer: Option<String>,
}

/// Root state of one authoring session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionBlock {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub context: ContextBlock,
  #[serde(default)]
  pub sub_questions: Vec<SubQuestion>,
  #[serde(default)]
  pub loading: bool,
  #[serde(default)]
  pub generated_questions: Vec<QuestionCreationItem>,
}

impl QuestionBlock {
  pub fn context(&self, scope: Scope) -> Option<&ContextBlock> {
    match scope {
      Scope::Outer => Some(&self.context),
      Scope::Sub(i) => self.sub_questions.get(i).map(|s| &s.context),
    }
  }

  /// Generated list searched by a reuse binding made from `scope`.
  pub fn generated_list(&self, scope: Scope, source: ReuseSource) -> Option<&[GeneratedContext]> {
    match source {
      ReuseSource::Local => self.context(scope).map(|c| c.generated.as_slice()),
      ReuseSource::Outer => Some(self.context.generated.as_slice()),
    }
  }
}
