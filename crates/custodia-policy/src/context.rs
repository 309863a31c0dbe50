//! Rule-scoped context loader manifests.
//!
//! A rule may declare external data to load into the evaluation context
//! before variable substitution: config maps, in-cluster API calls, or
//! inline variables. The engine hands these entries to a `ContextLoader`
//! implementation; the types here only describe what to load.

use serde::{Deserialize, Serialize};

/// One entry in a rule's context manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// Name the loaded data is bound to in the evaluation context.
    pub name: String,

    /// Load a config map's data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapReference>,

    /// Load the response of an in-cluster API call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call: Option<ApiCall>,

    /// Bind an inline JSON value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<Variable>,
}

/// Reference to a config map to load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapReference {
    /// Config map name.
    pub name: String,
    /// Config map namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// An in-cluster API call whose response is added to the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCall {
    /// URL path of the call (e.g. `/api/v1/namespaces/{{ request.namespace }}`).
    pub url_path: String,
    /// Optional post-processing expression applied to the response.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jmes_path: String,
}

/// An inline variable with an optional default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// The value to bind; may itself contain `{{ … }}` expressions.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
    /// Fallback when `value` resolves to nothing.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub default: serde_json::Value,
}
