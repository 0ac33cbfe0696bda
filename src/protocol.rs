//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! One `Command` enum serves both transports: HTTP posts it as the body of
//! `/sessions/:id/commands`, WebSocket sends one per text frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::Parent;
use crate::domain::{DetailId, DetailType, InputNode, ReuseSource, Scope, Topic};
use crate::error::Error;
use crate::session::SessionSnapshot;

fn outer() -> Scope {
    Scope::Outer
}

fn local() -> ReuseSource {
    ReuseSource::Local
}

/// Everything a client can do to a draft.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SetDescription {
        text: String,
    },
    AddSubQuestion,
    RemoveSubQuestion {
        index: usize,
    },
    SetSubQuestionDescription {
        index: usize,
        text: String,
    },
    SetMarks {
        index: usize,
        marks: u32,
    },
    SetNumOptions {
        index: usize,
        num_options: u32,
    },

    // context entries
    AddDetail {
        #[serde(default = "outer")]
        scope: Scope,
        kind: DetailType,
    },
    RemoveDetail {
        #[serde(default = "outer")]
        scope: Scope,
        detail_id: DetailId,
    },

    // algorithm binding
    SelectTopic {
        #[serde(default = "outer")]
        scope: Scope,
        topic: String,
    },
    SelectSubtopic {
        #[serde(default = "outer")]
        scope: Scope,
        subtopic: String,
    },
    SetUserAlgoCode {
        #[serde(default = "outer")]
        scope: Scope,
        code: String,
    },
    SetUserEnvCode {
        #[serde(default = "outer")]
        scope: Scope,
        code: String,
    },
    SelectSubclass {
        #[serde(default = "outer")]
        scope: Scope,
        variable: String,
        subclass: String,
    },
    SelectQuantifiable {
        #[serde(default = "outer")]
        scope: Scope,
        variable: String,
        element_type: String,
    },
    SetArgument {
        #[serde(default = "outer")]
        scope: Scope,
        variable: String,
        argument: String,
        value: String,
    },

    // input binding
    SetInputPath {
        #[serde(default = "outer")]
        scope: Scope,
        path: Vec<String>,
    },

    // sub-question queries
    SelectDetail {
        index: usize,
        detail_id: Option<DetailId>,
    },
    SelectQueryable {
        index: usize,
        queryable: String,
    },
    SelectInputQueryable {
        index: usize,
        queryable: String,
    },

    // generation
    GenerateVariables {
        #[serde(default = "outer")]
        scope: Scope,
    },
    GenerateInput {
        #[serde(default = "outer")]
        scope: Scope,
        #[serde(default)]
        inherit_outer: bool,
    },
    UseGeneratedInput {
        #[serde(default = "outer")]
        scope: Scope,
        variable: String,
        #[serde(default = "local")]
        source: ReuseSource,
        index: i64,
    },
    ReuseCandidates {
        #[serde(default = "outer")]
        scope: Scope,
        variable: String,
        #[serde(default = "local")]
        source: ReuseSource,
    },
    GenerateQuestion,
    Submit {
        #[serde(default)]
        parent: Option<Parent>,
    },
    DismissError,
    Reset,
}

impl Command {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetDescription { .. } => "set_description",
            Command::AddSubQuestion => "add_sub_question",
            Command::RemoveSubQuestion { .. } => "remove_sub_question",
            Command::SetSubQuestionDescription { .. } => "set_sub_question_description",
            Command::SetMarks { .. } => "set_marks",
            Command::SetNumOptions { .. } => "set_num_options",
            Command::AddDetail { .. } => "add_detail",
            Command::RemoveDetail { .. } => "remove_detail",
            Command::SelectTopic { .. } => "select_topic",
            Command::SelectSubtopic { .. } => "select_subtopic",
            Command::SetUserAlgoCode { .. } => "set_user_algo_code",
            Command::SetUserEnvCode { .. } => "set_user_env_code",
            Command::SelectSubclass { .. } => "select_subclass",
            Command::SelectQuantifiable { .. } => "select_quantifiable",
            Command::SetArgument { .. } => "set_argument",
            Command::SetInputPath { .. } => "set_input_path",
            Command::SelectDetail { .. } => "select_detail",
            Command::SelectQueryable { .. } => "select_queryable",
            Command::SelectInputQueryable { .. } => "select_input_queryable",
            Command::GenerateVariables { .. } => "generate_variables",
            Command::GenerateInput { .. } => "generate_input",
            Command::UseGeneratedInput { .. } => "use_generated_input",
            Command::ReuseCandidates { .. } => "reuse_candidates",
            Command::GenerateQuestion => "generate_question",
            Command::Submit { .. } => "submit",
            Command::DismissError => "dismiss_error",
            Command::Reset => "reset",
        }
    }
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Snapshot {
        session: SessionSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_ids: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        candidates: Option<Vec<usize>>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerWsMessage {
    pub fn error(e: &Error) -> Self {
        ServerWsMessage::Error { code: e.code().into(), message: e.to_string() }
    }
}

//
// HTTP request/response DTOs
//

/// Body of `POST /sessions`; both fields absent for a fresh draft.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionIn {
    #[serde(default)]
    pub state: Option<Value>,
    #[serde(default)]
    pub question_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandOut {
    pub session: SessionSnapshot,
    /// Set after a successful `submit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_ids: Option<Vec<String>>,
    /// Answer to `reuse_candidates`: indices into the chosen generated list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<usize>>,
}

#[derive(Debug, Default, Serialize)]
pub struct CatalogOut {
    pub topics: Vec<Topic>,
    pub quantifiables: Vec<String>,
    pub inputs: Vec<InputNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorOut {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorOut {
    fn from(e: &Error) -> Self {
        Self { code: e.code().into(), message: e.to_string() }
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
