use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;

/// Returns a flag raised by the termination signals (SIGINT, SIGTERM, ...). A
/// second signal while the flag is already raised exits the process immediately.
pub fn shutdown_flag() -> std::io::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));

    for sig in TERM_SIGNALS {
        // Registered first so it only fires once the flag below has been set
        flag::register_conditional_shutdown(*sig, 1, Arc::clone(&shutdown))?;
        flag::register(*sig, Arc::clone(&shutdown))?;
    }

    Ok(shutdown)
}
