//! GraphQL documents the session issues and their response shapes.

use gql_transport::ServiceFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const LOGIN: &str = "mutation Login($login: String!, $passwd: String!) { \
     login(input: { login: $login, passwd: $passwd }) { result { jwt } } }";

pub(crate) const REFRESH_JWT: &str = "mutation RefreshJwt($jwt: String!) { \
     refreshJwt(input: { jwt: $jwt }) { result { jwt } } }";

pub(crate) const CURRENT_PERSON: &str = "query CurrentPerson { getCurrentPerson { id } }";

#[derive(Debug, Serialize)]
pub(crate) struct LoginVariables<'a> {
    pub login: &'a str,
    pub passwd: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshVariables<'a> {
    pub jwt: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct NoVariables {}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginData {
    #[serde(default)]
    login: Option<JwtPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshData {
    #[serde(default, rename = "refreshJwt")]
    refresh_jwt: Option<JwtPayload>,
}

#[derive(Debug, Deserialize)]
struct JwtPayload {
    #[serde(default)]
    result: Option<JwtResult>,
}

#[derive(Debug, Deserialize)]
struct JwtResult {
    #[serde(default)]
    jwt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentPersonData {
    #[serde(default, rename = "getCurrentPerson")]
    person: Option<PersonRef>,
}

#[derive(Debug, Deserialize)]
struct PersonRef {
    #[serde(default)]
    id: Value,
}

/// A missing or empty jwt is a GraphQL-class failure.
fn usable_jwt(payload: Option<JwtPayload>) -> Result<String, ServiceFailure> {
    payload
        .and_then(|p| p.result)
        .and_then(|r| r.jwt)
        .filter(|jwt| !jwt.is_empty())
        .ok_or_else(|| ServiceFailure::graphql(Vec::new()))
}

impl LoginData {
    /// Token from a login response; `data: null` counts as no token.
    pub fn jwt(data: Option<Self>) -> Result<String, ServiceFailure> {
        usable_jwt(data.and_then(|d| d.login))
    }
}

impl RefreshData {
    pub fn jwt(data: Option<Self>) -> Result<String, ServiceFailure> {
        usable_jwt(data.and_then(|d| d.refresh_jwt))
    }
}

impl CurrentPersonData {
    /// Person id as a string; numeric ids are stringified.
    pub fn into_person_id(self) -> Option<String> {
        match self.person?.id {
            Value::String(id) if !id.is_empty() => Some(id),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_jwt() {
        let data: Option<LoginData> =
            serde_json::from_value(json!({ "login": { "result": { "jwt": "abc" } } })).unwrap();
        assert_eq!(LoginData::jwt(data).unwrap(), "abc");
    }

    #[test]
    fn test_missing_or_empty_jwt_is_graphql_failure() {
        for data in [
            json!({ "login": { "result": { "jwt": null } } }),
            json!({ "login": { "result": { "jwt": "" } } }),
            json!({ "login": { "result": null } }),
            json!({ "login": null }),
            json!({}),
            json!(null),
        ] {
            let data: Option<LoginData> = serde_json::from_value(data).unwrap();
            match LoginData::jwt(data).unwrap_err() {
                ServiceFailure::GraphQl { message, .. } => assert_eq!(message, "unknown error"),
                other => panic!("unexpected failure: {other:?}"),
            }
        }
    }

    #[test]
    fn test_refresh_jwt() {
        let data: Option<RefreshData> =
            serde_json::from_value(json!({ "refreshJwt": { "result": { "jwt": "new" } } }))
                .unwrap();
        assert_eq!(RefreshData::jwt(data).unwrap(), "new");
        assert!(matches!(
            RefreshData::jwt(None),
            Err(ServiceFailure::GraphQl { .. })
        ));
    }

    #[test]
    fn test_person_id() {
        let data: CurrentPersonData =
            serde_json::from_value(json!({ "getCurrentPerson": { "id": "p-1" } })).unwrap();
        assert_eq!(data.into_person_id().as_deref(), Some("p-1"));

        let data: CurrentPersonData =
            serde_json::from_value(json!({ "getCurrentPerson": { "id": 42 } })).unwrap();
        assert_eq!(data.into_person_id().as_deref(), Some("42"));

        let data: CurrentPersonData =
            serde_json::from_value(json!({ "getCurrentPerson": null })).unwrap();
        assert_eq!(data.into_person_id(), None);
    }

    #[test]
    fn test_variables_shape() {
        let variables = LoginVariables {
            login: "ada",
            passwd: "secret",
        };
        assert_eq!(
            serde_json::to_value(&variables).unwrap(),
            json!({ "login": "ada", "passwd": "secret" })
        );
        assert_eq!(serde_json::to_value(NoVariables {}).unwrap(), json!({}));
    }
}
