use trigsync_core::DecodeError;
use trigsync_kubehub::ClientError;

use crate::context::ContextError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listing triggers in {namespace}: {source}")]
    List {
        namespace: String,
        #[source]
        source: ClientError,
    },
    #[error("fetching trigger {namespace}/{name}: {source}")]
    Fetch {
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },
    #[error("{op} trigger {namespace}/{name}: {source}")]
    Mutation {
        op: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("desired trigger at position {index} has no metadata.name")]
    InvalidItem { index: usize },
    #[error("timed out waiting for trigger {name}")]
    WaitTimeout { name: String },
    #[error("cancelled while waiting for trigger {name}")]
    WaitCancelled { name: String },
    #[error("watching for trigger {name}: {source}")]
    Watch {
        name: String,
        #[source]
        source: ClientError,
    },
    #[error("watch for trigger {name} closed before it was observed")]
    WatchClosed { name: String },
    #[error("pre-callback aborted: {0}")]
    CallbackAborted(anyhow::Error),
    #[error("post-callback failed: {0}")]
    CallbackObserved(anyhow::Error),
    #[error("reconciliation interrupted: {0}")]
    Interrupted(ContextError),
}

impl Error {
    pub(crate) fn wait(name: &str, cause: ContextError) -> Self {
        match cause {
            ContextError::Cancelled => Error::WaitCancelled { name: name.to_string() },
            ContextError::DeadlineExceeded => Error::WaitTimeout { name: name.to_string() },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
