//! GraphQL-over-HTTP wire format.

use crate::ServiceFailure;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body: `{"query": ..., "variables": ...}`.
#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a, V: ?Sized> {
    pub query: &'a str,
    pub variables: &'a V,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<ErrorEntry>>,
}

/// Servers send error objects; some older ones send bare strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorEntry {
    Object {
        #[serde(default)]
        message: String,
    },
    Text(String),
}

impl ErrorEntry {
    fn into_message(self) -> String {
        match self {
            ErrorEntry::Object { message } => message,
            ErrorEntry::Text(message) => message,
        }
    }
}

/// Decode a successful HTTP body into `T`.
///
/// A non-empty `errors` list wins over any `data` present. A missing or null
/// `data` with no errors decodes only into types that accept null, such as
/// `Option<T>`; anything else is a decode failure.
pub(crate) fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T, ServiceFailure> {
    let envelope: ResponseEnvelope = serde_json::from_str(body)
        .map_err(|e| ServiceFailure::decode("malformed GraphQL response envelope", e))?;

    let errors = envelope.errors.unwrap_or_default();
    if !errors.is_empty() {
        return Err(ServiceFailure::graphql(
            errors.into_iter().map(ErrorEntry::into_message).collect(),
        ));
    }

    match envelope.data {
        None | Some(Value::Null) => {
            serde_json::from_value(Value::Null).map_err(|_| ServiceFailure::Decode {
                message: "GraphQL response has no data".to_string(),
                source: None,
            })
        }
        Some(data) => serde_json::from_value(data)
            .map_err(|e| ServiceFailure::decode("unexpected shape of GraphQL data", e)),
    }
}

/// Operation name from a document such as `mutation Login($login: String!)`,
/// for log fields.
pub(crate) fn operation_name(query: &str) -> Option<&str> {
    let mut words = query.split(|c: char| c.is_whitespace() || c == '(' || c == '{');
    let keyword = words.find(|w| !w.is_empty())?;
    if !matches!(keyword, "query" | "mutation" | "subscription") {
        return None;
    }
    words.find(|w| !w.is_empty())
}
