//! Scripted backend and token source shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{ManualClock, Secret};
use vertex_auth::{CredentialProvider, IssuedToken, TokenSource};

use crate::backend::Backend;
use crate::error::BackendError;
use crate::request::JobHandle;
use crate::wire::{
    GeneratedVideo, OperationError, OperationResponse, OperationStatus, PredictRequest,
    SubmitResponse,
};

/// Issues `at_1`, `at_2`, ... valid for an hour.
#[derive(Default)]
pub(crate) struct StaticSource {
    pub calls: AtomicUsize,
}

impl TokenSource for StaticSource {
    fn issue(&self) -> Pin<Box<dyn Future<Output = vertex_auth::Result<IssuedToken>> + Send + '_>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedToken {
                access_token: Secret::new(format!("at_{n}")),
                expires_in: Duration::from_secs(3600),
            })
        })
    }
}

/// Always fails the exchange.
pub(crate) struct RevokedSource;

impl TokenSource for RevokedSource {
    fn issue(&self) -> Pin<Box<dyn Future<Output = vertex_auth::Result<IssuedToken>> + Send + '_>> {
        Box::pin(async {
            Err(vertex_auth::Error::InvalidCredentials(
                "invalid_grant: account disabled".into(),
            ))
        })
    }
}

pub(crate) fn credentials(source: Arc<dyn TokenSource>) -> Arc<CredentialProvider> {
    Arc::new(CredentialProvider::new(
        source,
        Arc::new(ManualClock::new(1_000_000)),
        Duration::from_secs(300),
    ))
}

/// Scripted answer to a submission on one candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Accept(&'static str),
    Reject(u16, &'static str),
    NoHandle,
    Hang,
}

/// Scripted answer to one status fetch.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Status {
    Pending,
    /// Done with one base64 video
    Video(&'static str),
    /// Done with an error message
    Error(&'static str),
    /// Done with neither error nor response
    Empty,
    /// Fetch fails at the transport level
    Broken,
    Hang,
}

pub(crate) struct ScriptedBackend {
    replies: Mutex<HashMap<String, Reply>>,
    statuses: Mutex<VecDeque<Status>>,
    fallback: Status,
    pub attempts: Mutex<Vec<String>>,
    pub tokens: Mutex<Vec<String>>,
    pub fetches: AtomicUsize,
}

impl ScriptedBackend {
    /// Backend whose status fetches return `statuses` in order, then
    /// `fallback` forever. Candidates without a reply are rejected with 404.
    pub fn new(statuses: impl IntoIterator<Item = Status>, fallback: Status) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            statuses: Mutex::new(statuses.into_iter().collect()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn reply(self, candidate: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(candidate.to_string(), reply);
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Backend for ScriptedBackend {
    fn submit<'a>(
        &'a self,
        candidate: &'a str,
        _body: &'a PredictRequest<'a>,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubmitResponse, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.lock().unwrap().push(candidate.to_string());
            self.tokens.lock().unwrap().push(token.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get(candidate)
                .copied()
                .unwrap_or(Reply::Reject(404, "model not found"));
            match reply {
                Reply::Accept(name) => Ok(SubmitResponse {
                    name: Some(name.to_string()),
                }),
                Reply::Reject(status, body) => Err(BackendError::Rejected {
                    status,
                    body: body.to_string(),
                }),
                Reply::NoHandle => Ok(SubmitResponse { name: None }),
                Reply::Hang => std::future::pending().await,
            }
        })
    }

    fn fetch_operation<'a>(
        &'a self,
        _handle: &'a JobHandle,
        _token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OperationStatus, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);
            match next {
                Status::Pending => Ok(OperationStatus::default()),
                Status::Video(b64) => Ok(OperationStatus {
                    done: true,
                    error: None,
                    response: Some(OperationResponse {
                        videos: vec![GeneratedVideo {
                            bytes_base64_encoded: Some(b64.to_string()),
                            mime_type: Some("video/mp4".into()),
                        }],
                    }),
                }),
                Status::Error(message) => Ok(OperationStatus {
                    done: true,
                    error: Some(OperationError {
                        code: Some(3),
                        message: Some(message.to_string()),
                    }),
                    response: None,
                }),
                Status::Empty => Ok(OperationStatus {
                    done: true,
                    ..Default::default()
                }),
                Status::Broken => Err(BackendError::Transport("connection reset".into())),
                Status::Hang => std::future::pending().await,
            }
        })
    }
}
