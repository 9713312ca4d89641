//! Pre/post observers run around every mutation.
//!
//! Pre-phase callbacks gate the mutation: the first error aborts it before anything is sent to
//! the cluster. Post-phase callbacks see the mutation outcome and may veto it, in which case
//! their error replaces the outcome.

use std::fmt;
use std::sync::Arc;

use kube::core::DynamicObject;
use tracing::debug;
use trigsync_core::object_name;

use crate::error::{Error, Result};

/// What a callback is invoked for.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// A single trigger being applied, or an orphan being removed.
    Item(&'a DynamicObject),
    /// The whole desired collection, for deletes.
    Items(&'a [DynamicObject]),
}

impl<'a> Subject<'a> {
    pub fn names(&self) -> Vec<&'a str> {
        match *self {
            Subject::Item(o) => vec![object_name(o)],
            Subject::Items(items) => items.iter().map(object_name).collect(),
        }
    }
}

/// Receives the subject and the error produced so far (always `None` in the pre-phase).
pub type Callback = Arc<dyn Fn(Subject<'_>, Option<&Error>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Callbacks {
    pub pre: Vec<Callback>,
    pub post: Vec<Callback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").field("pre", &self.pre.len()).field("post", &self.post.len()).finish()
    }
}

impl Callbacks {
    pub fn on_pre<F>(mut self, f: F) -> Self
    where
        F: Fn(Subject<'_>, Option<&Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pre.push(Arc::new(f));
        self
    }

    pub fn on_post<F>(mut self, f: F) -> Self
    where
        F: Fn(Subject<'_>, Option<&Error>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.post.push(Arc::new(f));
        self
    }

    pub(crate) fn run_pre(&self, subject: Subject<'_>) -> Result<()> {
        for cb in &self.pre {
            if let Err(e) = cb(subject, None) {
                debug!(subject = ?subject.names(), error = %e, "pre-callback aborted");
                return Err(Error::CallbackAborted(e));
            }
        }
        Ok(())
    }

    /// Runs the post-phase and returns the final outcome: the first callback error if any,
    /// otherwise `outcome` unchanged.
    pub(crate) fn run_post(&self, subject: Subject<'_>, outcome: Result<()>) -> Result<()> {
        let prior = outcome.as_ref().err();
        for cb in &self.post {
            if let Err(e) = cb(subject, prior) {
                debug!(subject = ?subject.names(), error = %e, "post-callback failed");
                return Err(Error::CallbackObserved(e));
            }
        }
        outcome
    }
}
