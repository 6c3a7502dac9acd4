/*
[INPUT]:  Commands from any thread (UI, worker completion, update coordinator)
[OUTPUT]: Single-consumer FIFO drained by the dispatcher
[POS]:    Messaging layer - the only channel between threads
[UPDATE]: When changing delivery guarantees between producers and the consumer
*/

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::command::Command;

/// Creates a connected sender/queue pair.
pub fn command_queue() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandQueue { rx })
}

/// Producer side. Cheap to clone, usable from plain OS threads.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: UnboundedSender<Command>,
}

impl CommandSender {
    /// Enqueues `command`. Returns `false` if the consumer is gone.
    pub fn send(&self, command: Command) -> bool {
        let kind = command.kind();
        match self.tx.send(command) {
            Ok(()) => {
                tracing::trace!(command = kind, "command enqueued");
                true
            }
            Err(_) => {
                tracing::debug!(command = kind, "command dropped; dispatcher gone");
                false
            }
        }
    }
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct CommandQueue {
    rx: UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Pops the next command without blocking.
    pub fn try_next(&mut self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            // Dispatcher keeps its own sender, so this only happens during teardown.
            Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
