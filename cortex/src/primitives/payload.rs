//! Typed command payloads, keyed by primitive type.
//!
//! Built-in primitives decode into their own argument struct. Primitives
//! registered or synthesized at runtime travel as [`CommandPayload::Custom`]
//! with their already schema-checked arguments.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FETCH: &str = "fetch";
pub const SEARCH: &str = "search";
pub const SUMMARIZE: &str = "summarize";
pub const RESPOND: &str = "respond";
pub const REMEMBER: &str = "remember";
pub const RECALL: &str = "recall";

/// Resource held by every `respond` command: one reply on the dialogue at a time.
pub const DIALOGUE_RESOURCE: &str = "dialogue";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FetchArgs {
    /// URL or document handle to retrieve.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SummarizeArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_words: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RespondArgs {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RememberArgs {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RecallArgs {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    Fetch(FetchArgs),
    Search(SearchArgs),
    Summarize(SummarizeArgs),
    Respond(RespondArgs),
    Remember(RememberArgs),
    Recall(RecallArgs),
    Custom { primitive: String, args: Value },
}

impl CommandPayload {
    /// Decode schema-checked params into the variant for `primitive`.
    pub fn decode(primitive: &str, params: &Value) -> Result<Self, String> {
        fn typed<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, String> {
            serde_json::from_value(params.clone()).map_err(|e| e.to_string())
        }

        let payload = match primitive {
            FETCH => CommandPayload::Fetch(typed(params)?),
            SEARCH => CommandPayload::Search(typed(params)?),
            SUMMARIZE => CommandPayload::Summarize(typed(params)?),
            RESPOND => CommandPayload::Respond(typed(params)?),
            REMEMBER => CommandPayload::Remember(typed(params)?),
            RECALL => CommandPayload::Recall(typed(params)?),
            other => CommandPayload::Custom {
                primitive: other.to_string(),
                args: params.clone(),
            },
        };
        Ok(payload)
    }

    pub fn primitive(&self) -> &str {
        match self {
            CommandPayload::Fetch(_) => FETCH,
            CommandPayload::Search(_) => SEARCH,
            CommandPayload::Summarize(_) => SUMMARIZE,
            CommandPayload::Respond(_) => RESPOND,
            CommandPayload::Remember(_) => REMEMBER,
            CommandPayload::Recall(_) => RECALL,
            CommandPayload::Custom { primitive, .. } => primitive,
        }
    }

    /// Arguments as a JSON object, without the type tag.
    pub fn args(&self) -> Value {
        let encoded = match self {
            CommandPayload::Fetch(args) => serde_json::to_value(args),
            CommandPayload::Search(args) => serde_json::to_value(args),
            CommandPayload::Summarize(args) => serde_json::to_value(args),
            CommandPayload::Respond(args) => serde_json::to_value(args),
            CommandPayload::Remember(args) => serde_json::to_value(args),
            CommandPayload::Recall(args) => serde_json::to_value(args),
            CommandPayload::Custom { args, .. } => Ok(args.clone()),
        };
        encoded.unwrap_or(Value::Null)
    }
}
