//! Recording stub transport shared by the client test suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fhir_client::{
    ClientConfig, FhirClient, Headers, HttpRequest, HttpResponse, HttpTransport, TransportError,
    FHIR_JSON,
};

pub const BASE_URL: &str = "http://example.com/fhir";

/// A response the stub hands out once.
pub struct Canned {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: [("Content-Type", FHIR_JSON)].into_iter().collect(),
            body: body.into(),
        }
    }

    pub fn ok(body: serde_json::Value) -> Self {
        Self::json(200, serde_json::to_vec(&body).unwrap())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }
}

/// Records every request and answers from a queue of canned responses.
#[derive(Default)]
pub struct Recorder {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Canned>>,
}

impl Recorder {
    pub fn new(responses: impl IntoIterator<Item = Canned>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests().pop().expect("no request was sent")
    }
}

impl HttpTransport for Recorder {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let canned = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or("no canned response left")?;
        Ok(HttpResponse::from_bytes(canned.status, canned.headers, canned.body))
    }
}

pub fn client(stub: &Arc<Recorder>) -> FhirClient {
    client_with(stub, ClientConfig::default())
}

pub fn client_with(stub: &Arc<Recorder>, config: ClientConfig) -> FhirClient {
    FhirClient::new(BASE_URL, Arc::clone(stub), config).unwrap()
}
