//! Verify request building and response classification against the JSON
//! test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, the expected request, a simulated
//! response, and the expected result or error. Bodies are compared as parsed
//! JSON (not raw strings) to avoid false negatives from field ordering.

mod common;

use std::sync::Arc;

use common::{Canned, Recorder};
use fhir_client::{
    check_operation_outcome, ClientConfig, FhirClient, FhirError, HttpMethod, HttpRequest,
    SearchMethod, Target,
};
use serde_json::Value;

const BASE_URL: &str = "http://localhost:8080/fhir";

fn client(stub: &Arc<Recorder>, search_method: SearchMethod) -> FhirClient {
    let config = ClientConfig::default().with_search_method(search_method);
    FhirClient::new(BASE_URL, Arc::clone(stub), config).unwrap()
}

fn load(raw: &str) -> Vec<Value> {
    let vectors: Value = serde_json::from_str(raw).unwrap();
    vectors["cases"].as_array().unwrap().clone()
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn simulated(case: &Value) -> Canned {
    let sim = &case["simulated_response"];
    Canned::json(
        sim["status"].as_u64().unwrap() as u16,
        sim["body"].as_str().unwrap(),
    )
}

fn assert_request(name: &str, request: &HttpRequest, expected: &Value) {
    assert_eq!(
        request.method,
        parse_method(expected["method"].as_str().unwrap()),
        "{name}: method"
    );
    assert_eq!(
        request.url.as_str(),
        format!("{BASE_URL}{}", expected["path"].as_str().unwrap()),
        "{name}: url"
    );

    let expected_headers: Vec<(&str, &str)> = expected["headers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| {
            let arr = h.as_array().unwrap();
            (arr[0].as_str().unwrap(), arr[1].as_str().unwrap())
        })
        .collect();
    assert_eq!(
        request.headers.iter().collect::<Vec<_>>(),
        expected_headers,
        "{name}: headers"
    );

    match (&expected["body"], &expected["form"]) {
        (Value::Null, Value::Null) => {
            assert!(request.body.is_none(), "{name}: body should be None")
        }
        (Value::Null, form) => {
            assert_eq!(request.body_str(), form.as_str(), "{name}: form body")
        }
        (body, _) => {
            let sent: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
            assert_eq!(&sent, body, "{name}: body");
        }
    }
}

/// Compare an exchange's outcome with `expected_result` / `expected_error`.
fn assert_outcome(name: &str, case: &Value, result: Result<(), FhirError>, parsed: &Value) {
    match case.get("expected_error") {
        Some(expected) => {
            let err = result.unwrap_err();
            let kind = match &err {
                FhirError::OperationOutcome(_) => "OperationOutcome",
                FhirError::Status { .. } => "Status",
                other => panic!("{name}: unexpected error {other:?}"),
            };
            assert_eq!(kind, expected["kind"].as_str().unwrap(), "{name}: error kind");
            assert_eq!(
                err.status(),
                expected["status"].as_u64().map(|s| s as u16),
                "{name}: error status"
            );
            assert_eq!(
                err.to_string(),
                expected["message"].as_str().unwrap(),
                "{name}: error message"
            );
        }
        None => {
            result.unwrap_or_else(|err| panic!("{name}: unexpected error {err}"));
            if let Some(expected) = case.get("expected_result") {
                assert_eq!(parsed, expected, "{name}: parsed result");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[test]
fn read_test_vectors() {
    for case in load(include_str!("../../test-vectors/read.json")) {
        let name = case["name"].as_str().unwrap();
        let stub = Recorder::new([simulated(&case)]);
        let mut result = Value::Null;

        let outcome = client(&stub, SearchMethod::Post).read(
            case["input_path"].as_str().unwrap(),
            Target::decode(&mut result),
            [],
        );

        assert_request(name, &stub.last_request(), &case["expected_request"]);
        assert_outcome(name, &case, outcome, &result);
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_test_vectors() {
    for case in load(include_str!("../../test-vectors/create.json")) {
        let name = case["name"].as_str().unwrap();
        let stub = Recorder::new([simulated(&case)]);
        let mut result = Value::Null;

        let outcome = client(&stub, SearchMethod::Post).create(
            &case["input"],
            Target::decode(&mut result),
            [],
        );

        assert_request(name, &stub.last_request(), &case["expected_request"]);
        assert_outcome(name, &case, outcome, &result);
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[test]
fn update_test_vectors() {
    for case in load(include_str!("../../test-vectors/update.json")) {
        let name = case["name"].as_str().unwrap();
        let stub = Recorder::new([simulated(&case)]);
        let mut result = Value::Null;

        let outcome = client(&stub, SearchMethod::Post).update(
            case["input_path"].as_str().unwrap(),
            &case["input"],
            Target::decode(&mut result),
            [],
        );

        assert_request(name, &stub.last_request(), &case["expected_request"]);
        assert_outcome(name, &case, outcome, &result);
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[test]
fn delete_test_vectors() {
    for case in load(include_str!("../../test-vectors/delete.json")) {
        let name = case["name"].as_str().unwrap();
        let stub = Recorder::new([simulated(&case)]);

        let outcome =
            client(&stub, SearchMethod::Post).delete(case["input_path"].as_str().unwrap(), []);

        assert_request(name, &stub.last_request(), &case["expected_request"]);
        assert_outcome(name, &case, outcome, &Value::Null);
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[test]
fn search_test_vectors() {
    for case in load(include_str!("../../test-vectors/search.json")) {
        let name = case["name"].as_str().unwrap();
        let method = match case["search_method"].as_str().unwrap() {
            "GET" => SearchMethod::Get,
            "POST" => SearchMethod::Post,
            other => panic!("{name}: unknown search method {other}"),
        };
        let params: Vec<(&str, &str)> = case["params"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p[0].as_str().unwrap(), p[1].as_str().unwrap()))
            .collect();
        let stub = Recorder::new([Canned::json(
            200,
            r#"{"resourceType":"Bundle","type":"searchset"}"#,
        )]);
        let mut result = Value::Null;

        client(&stub, method)
            .search(
                case["resource_type"].as_str(),
                &params,
                Target::decode(&mut result),
                [],
            )
            .unwrap_or_else(|err| panic!("{name}: unexpected error {err}"));

        assert_request(name, &stub.last_request(), &case["expected_request"]);
        assert_eq!(result["resourceType"], "Bundle", "{name}: parsed result");
    }
}

// ---------------------------------------------------------------------------
// OperationOutcome classification
// ---------------------------------------------------------------------------

#[test]
fn operation_outcome_test_vectors() {
    for case in load(include_str!("../../test-vectors/operation_outcome.json")) {
        let name = case["name"].as_str().unwrap();
        let status = case["status"].as_u64().unwrap() as u16;

        let result = check_operation_outcome(
            case["body"].as_str().unwrap().as_bytes(),
            case["force_error"].as_bool().unwrap(),
            status,
        );

        match case["expected_error"].as_str() {
            Some(message) => {
                let err = result.unwrap_err();
                assert_eq!(err.to_string(), message, "{name}: message");
                assert_eq!(err.http_status, status, "{name}: status");
            }
            None => assert!(result.is_ok(), "{name}: expected no error"),
        }
    }
}
