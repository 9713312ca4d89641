use futures::StreamExt;
use tracing::debug;
use trigsync_core::object_name;
use trigsync_kubehub::{TriggerClient, WatchEvent};

use crate::context::Context;
use crate::error::{Error, Result};

/// Block until an added/modified event for `name` shows up on the namespace watch.
///
/// Observing the object at all counts as applied; readiness conditions are not inspected.
/// `ctx` is the only timeout.
pub async fn wait_for(ctx: &Context, client: &dyn TriggerClient, namespace: &str, name: &str) -> Result<()> {
    let mut stream = client
        .watch(namespace)
        .await
        .map_err(|source| Error::Watch { name: name.to_string(), source })?;
    loop {
        tokio::select! {
            biased;
            cause = ctx.done() => return Err(Error::wait(name, cause)),
            ev = stream.next() => match ev {
                Some(Ok(WatchEvent::Added(o) | WatchEvent::Modified(o))) if object_name(&o) == name => {
                    debug!(ns = %namespace, name = %name, "trigger observed");
                    return Ok(());
                }
                Some(Ok(_)) => continue,
                Some(Err(source)) => return Err(Error::Watch { name: name.to_string(), source }),
                None => return Err(Error::WatchClosed { name: name.to_string() }),
            },
        }
    }
}
