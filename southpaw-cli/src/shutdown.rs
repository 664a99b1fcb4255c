//! Cooperative shutdown flag (spec §5 `processRecords`), set by a SIGINT/
//! SIGTERM handler. Simplified from the teacher's `shutdown` module (which
//! broadcasts across a multi-node async runtime) to the single flag this
//! engine's single-threaded driver checks on every loop iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn install() -> Arc<AtomicBool> {
    let keep_running = Arc::new(AtomicBool::new(true));
    let flag = keep_running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal, finishing the current scheduler pop");
        flag.store(false, Ordering::Relaxed);
    })
    .expect("failed to install SIGINT/SIGTERM handler");
    keep_running
}
