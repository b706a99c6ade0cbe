//! Wake signalling — a capacity-one poke from mutators to the run loop.
//!
//! Mutating API calls (add, remove, resume) change what the next activation
//! is; they signal the loop to recompute its timer. The send never blocks:
//! if a signal is already pending the new one is dropped, coalescing bursts
//! into a single wake.

use tokio::sync::mpsc;

pub(crate) fn wake_channel() -> (WakeHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (WakeHandle { tx }, rx)
}

#[derive(Clone)]
pub(crate) struct WakeHandle {
    tx: mpsc::Sender<()>,
}

impl WakeHandle {
    /// Non-blocking. Full means a wake is already pending; closed means the
    /// loop is gone. Both are fine to ignore.
    pub(crate) fn signal(&self) {
        let _ = self.tx.try_send(());
    }
}
