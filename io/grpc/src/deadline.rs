//! Per-call deadline watchers.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io;
use std::thread;
use std::time::Duration;

/// Run `on_expire` on a named thread once `timeout` elapses.
///
/// The watcher exits without firing when every sender paired with `done`
/// is dropped first.
pub(crate) fn watch<F>(name: String, timeout: Duration, done: Receiver<()>, on_expire: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(timeout) {
            on_expire();
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::time::Instant;

    #[test]
    fn test_fires_after_timeout() {
        let (_done_tx, done_rx) = unbounded();
        let (fired_tx, fired_rx) = bounded(1);
        watch(
            "test-deadline".into(),
            Duration::from_millis(20),
            done_rx,
            move || {
                let _ = fired_tx.send(Instant::now());
            },
        )
        .unwrap();
        assert!(fired_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let (done_tx, done_rx) = unbounded::<()>();
        let (fired_tx, fired_rx) = bounded(1);
        watch(
            "test-deadline".into(),
            Duration::from_millis(200),
            done_rx,
            move || {
                let _ = fired_tx.send(());
            },
        )
        .unwrap();
        drop(done_tx);
        // the closure (and its sender) is dropped without running
        assert_eq!(
            fired_rx.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        );
    }
}
