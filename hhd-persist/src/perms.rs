//! Ownership fix-ups for files written on behalf of the context user.

use std::path::Path;

use hhd_core::Context;

/// Hand `path` to the context user. Failures are expected when the daemon
/// already runs as that user without privileges, so they are only logged.
pub fn fix_owner(path: &Path, ctx: &Context) {
    if let Err(err) = std::os::unix::fs::chown(path, Some(ctx.uid), Some(ctx.gid)) {
        tracing::debug!(path = %path.display(), error = %err, "could not change owner");
    }
}
