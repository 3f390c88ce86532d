//! Bridge from SIGINT/SIGTERM to the shared cancellation token.

use crate::cancel::CancellationToken;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info};

static CONTEXT: Mutex<Option<CancellationToken>> = Mutex::new(None);

/// Get the token that is cancelled on the first SIGINT or SIGTERM
///
/// The handlers are registered once per process; later calls return the
/// same token. Signals after the first are drained without effect, so the
/// default disposition never kills the sidecar mid-shutdown.
pub fn signal_context() -> std::io::Result<CancellationToken> {
    let mut context = CONTEXT.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(token) = context.as_ref() {
        return Ok(token.clone());
    }

    let token = CancellationToken::new();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    let listener = token.clone();
    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            for signal in signals.forever() {
                if listener.cancel() {
                    info!(signal, "received termination signal");
                } else {
                    debug!(signal, "ignoring signal, shutdown already requested");
                }
            }
        })?;

    *context = Some(token.clone());
    Ok(token)
}
