use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gql_transport::{
    CancellationToken, GraphQlTransport, RetryConfig, ServiceFailure, TransportConfig,
};

#[derive(Debug, Deserialize, PartialEq)]
struct PersonResponse {
    #[serde(rename = "getCurrentPerson")]
    person: Person,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Person {
    id: String,
}

const QUERY: &str = "query CurrentPerson { getCurrentPerson { id } }";

fn config(server: &MockServer) -> TransportConfig {
    let mut config = TransportConfig::new(format!("{}/graphql", server.uri()).parse().unwrap());
    config.retry = RetryConfig {
        max_retries: 2,
        backoff_base: 2.0,
        backoff_unit: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    };
    config
}

#[tokio::test]
async fn execute_decodes_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "query": QUERY, "variables": {} })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "getCurrentPerson": { "id": "p-1" } } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let response: PersonResponse = transport
        .execute(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.person.id, "p-1");
}

#[tokio::test]
async fn execute_with_raw_returns_wire_payload() {
    let server = MockServer::start().await;
    let body = r#"{"data":{"getCurrentPerson":{"id":"p-2"}}}"#;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let (response, raw): (PersonResponse, String) = transport
        .execute_with_raw(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.person.id, "p-2");
    assert_eq!(raw, body);
}

#[tokio::test]
async fn bearer_header_is_sent_when_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "getCurrentPerson": { "id": "p-1" } } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    transport.set_bearer(Some("tok-1"));
    let _: PersonResponse = transport
        .execute(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn bare_transport_never_sends_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "getCurrentPerson": { "id": "p-1" } } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::bare(config(&server)).unwrap();
    transport.set_bearer(Some("tok-1"));
    let _: PersonResponse = transport
        .execute(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn graphql_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "message": "X" }, { "message": "Y" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ServiceFailure::GraphQl { message, messages } => {
            assert_eq!(message, "X");
            assert_eq!(messages, vec!["X", "Y"]);
        }
        other => panic!("expected GraphQl failure, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_keeps_body_and_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such endpoint"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ServiceFailure::HttpStatus {
            status,
            body,
            transient,
        } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such endpoint");
            assert!(!transient);
        }
        other => panic!("expected HttpStatus failure, got {other:?}"),
    }
}

#[tokio::test]
async fn handled_status_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(429));
    assert!(err.is_transient());
}

#[tokio::test]
async fn null_data_is_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceFailure::Decode { .. }));
}

#[tokio::test]
async fn malformed_body_is_decode_failure_with_cause() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(std::error::Error::source(&err).is_some());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn connection_refused_is_network_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = format!("http://127.0.0.1:{port}/graphql").parse().unwrap();
    let mut config = TransportConfig::new(endpoint);
    config.retry.backoff_unit = Duration::from_millis(1);
    config.retry.max_backoff = Duration::from_millis(5);

    let transport = GraphQlTransport::new(config).unwrap();
    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceFailure::Network { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "getCurrentPerson": { "id": "p-1" } } }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let transport = GraphQlTransport::new(config(&server)).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = transport
        .execute::<PersonResponse, _>(QUERY, &json!({}), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(transport.breaker().snapshot().consecutive_failures, 0);
}
