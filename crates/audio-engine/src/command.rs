//! Latest-wins transport command hand-off.
//!
//! The sender stores the command in a single atomic slot, then posts a wake-up token on a
//! counting signal (an unbounded channel of `()`). The receiver blocks on the signal and reads
//! whatever the slot holds at wake-up time, so intermediate commands can be skipped.
//! Transport commands are level-triggered; only the latest intent matters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::{Receiver, Sender};

/// Transport intent for an output device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    None = 0,
    Play = 1,
    Pause = 2,
    Close = 3,
}

impl Command {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Command::Play,
            2 => Command::Pause,
            3 => Command::Close,
            _ => Command::None,
        }
    }
}

/// Caller-side half. Never blocks.
#[derive(Clone)]
pub struct CommandSender {
    slot: Arc<AtomicU8>,
    signal: Sender<()>,
}

/// Executor-side half.
pub struct CommandReceiver {
    slot: Arc<AtomicU8>,
    signal: Receiver<()>,
}

/// Create a connected command channel with an empty (`None`) slot.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let slot = Arc::new(AtomicU8::new(Command::None as u8));
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        CommandSender {
            slot: slot.clone(),
            signal: tx,
        },
        CommandReceiver { slot, signal: rx },
    )
}

impl CommandSender {
    /// Overwrite the slot with `command` and wake the executor.
    ///
    /// Returns `false` if the wake-up could not be delivered (the executor is gone).
    /// The slot is updated either way.
    pub fn submit(&self, command: Command) -> bool {
        self.slot.store(command as u8, Ordering::SeqCst);
        if self.signal.send(()).is_err() {
            tracing::warn!(?command, "command signal delivery failed");
            return false;
        }
        true
    }

    /// The value currently in the slot.
    pub fn latest(&self) -> Command {
        Command::from_u8(self.slot.load(Ordering::SeqCst))
    }
}

impl CommandReceiver {
    /// Block until signalled, then return the latest command.
    ///
    /// Returns `None` once every sender is gone and no signal is pending.
    pub fn wait(&self) -> Option<Command> {
        self.signal.recv().ok()?;
        Some(Command::from_u8(self.slot.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_empty() {
        let (tx, _rx) = command_channel();
        assert_eq!(tx.latest(), Command::None);
    }

    #[test]
    fn last_writer_wins_before_wakeup() {
        let (tx, rx) = command_channel();
        assert!(tx.submit(Command::Play));
        assert!(tx.submit(Command::Pause));
        assert!(tx.submit(Command::Play));

        // Every wake-up is counted, each one reads the latest value.
        assert_eq!(rx.wait(), Some(Command::Play));
        assert_eq!(rx.wait(), Some(Command::Play));
        assert_eq!(rx.wait(), Some(Command::Play));
    }

    #[test]
    fn play_then_close_observes_close() {
        let (tx, rx) = command_channel();
        tx.submit(Command::Play);
        tx.submit(Command::Close);
        assert_eq!(rx.wait(), Some(Command::Close));
    }

    #[test]
    fn submit_reports_lost_receiver() {
        let (tx, rx) = command_channel();
        drop(rx);
        assert!(!tx.submit(Command::Pause));
        assert_eq!(tx.latest(), Command::Pause);
    }

    #[test]
    fn wait_returns_none_when_senders_dropped() {
        let (tx, rx) = command_channel();
        drop(tx);
        assert_eq!(rx.wait(), None);
    }

    #[test]
    fn wait_blocks_until_submit() {
        let (tx, rx) = command_channel();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let handle = thread::spawn(move || {
            let cmd = rx.wait();
            let _ = done_tx.send(cmd);
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        tx.submit(Command::Pause);
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some(Command::Pause)
        );
        handle.join().unwrap();
    }
}
