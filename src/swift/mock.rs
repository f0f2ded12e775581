//! In-process backend for tests.
//!
//! Answers every call through a closure and records what it was asked,
//! so tests can assert both the wire shape and the order of calls.

use http::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::backend::{BackendCall, BackendResponse, SwiftBackend};

type Responder = Box<dyn Fn(&BackendCall) -> BackendResponse + Send + Sync>;

pub struct MockBackend {
    responder: Responder,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&BackendCall) -> BackendResponse + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend that answers every call with `status`.
    pub fn always(status: StatusCode) -> Self {
        Self::new(move |_| BackendResponse::new(status))
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `"METHOD path"` for every call, in order.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }
}

impl SwiftBackend for MockBackend {
    fn call(
        &self,
        call: BackendCall,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BackendResponse>> + Send + '_>> {
        let resp = (self.responder)(&call);
        self.calls.lock().unwrap().push(call);
        Box::pin(async move { Ok(resp) })
    }
}
