//! Scripted credential service.
//!
//! Queued results are returned in order; once the queue is empty every fetch
//! succeeds with [`crate::fixtures::test_credentials`], unless the service
//! was set to hang.

use crate::fixtures::test_credentials;
use async_trait::async_trait;
use classroom_client::credentials::{CredentialRequest, CredentialService};
use classroom_client::errors::CredentialError;
use classroom_client::lifecycle::Credentials;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockCredentialService {
    script: Mutex<VecDeque<Result<Credentials, CredentialError>>>,
    requests: Mutex<Vec<CredentialRequest>>,
    hang: AtomicBool,
}

impl MockCredentialService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one failure.
    pub fn push_failure(&self, error: CredentialError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Queue one success.
    pub fn push_success(&self, credentials: Credentials) {
        self.script.lock().unwrap().push_back(Ok(credentials));
    }

    /// Fail every fetch from now on with `error`, `times` times.
    pub fn fail_times(&self, error: &CredentialError, times: usize) {
        for _ in 0..times {
            self.push_failure(error.clone());
        }
    }

    /// Never answer (until the caller times out).
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<CredentialRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialService for MockCredentialService {
    async fn fetch(&self, request: &CredentialRequest) -> Result<Credentials, CredentialError> {
        self.requests.lock().unwrap().push(request.clone());

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(test_credentials()))
    }
}
