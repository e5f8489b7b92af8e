//! Worker contexts and the hand-off channels between them.
//!
//! Each stage owns its state on a dedicated thread and runs posted closures
//! in FIFO order against it. Nothing outside the thread touches the state.

use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, warn};

use crate::{VrError, VrResult};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Task<S>),
    Stop,
}

/// Posting end of a stage queue.
pub struct StageSender<S> {
    name: Arc<str>,
    tx: Sender<Message<S>>,
}

impl<S> Clone for StageSender<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<S> fmt::Debug for StageSender<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSender").field("name", &self.name).finish()
    }
}

impl<S: 'static> StageSender<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `task` behind everything already posted.
    pub fn post<F>(&self, task: F) -> VrResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(task)))
            .map_err(|_| VrError::StageClosed(self.name.to_string()))
    }

    /// Runs `task` on the stage and waits for its result.
    pub fn query<R, F>(&self, task: F) -> VrResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.post(move |state| {
            let _ = reply_tx.send(task(state));
        })?;
        reply_rx
            .recv()
            .map_err(|_| VrError::StageClosed(self.name.to_string()))
    }

    /// Blocks until every task posted before this call has run.
    pub fn flush(&self) -> VrResult<()> {
        self.query(|_| ())
    }
}

/// A long-lived worker thread owning state `S`.
pub struct StageContext<S> {
    sender: StageSender<S>,
    join: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> StageContext<S> {
    pub fn spawn(name: &str, state: S) -> VrResult<Self> {
        let (tx, rx) = mpsc::channel::<Message<S>>();
        let thread_name = format!("xrpipe-{name}");
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(rx, state))
            .map_err(|e| VrError::Unavailable(format!("{thread_name} spawn: {e}")))?;
        debug!("started {}", thread_name);

        Ok(Self {
            sender: StageSender {
                name: Arc::from(name),
                tx,
            },
            join: Some(join),
        })
    }

    pub fn sender(&self) -> StageSender<S> {
        self.sender.clone()
    }

    pub fn post<F>(&self, task: F) -> VrResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.sender.post(task)
    }

    pub fn query<R, F>(&self, task: F) -> VrResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        self.sender.query(task)
    }

    pub fn flush(&self) -> VrResult<()> {
        self.sender.flush()
    }

    /// Lets queued tasks finish, stops the thread and returns its state.
    /// Returns `None` if the thread already stopped or panicked.
    pub fn shutdown(&mut self) -> Option<S> {
        let join = self.join.take()?;
        let _ = self.sender.tx.send(Message::Stop);
        match join.join() {
            Ok(state) => {
                debug!("stopped xrpipe-{}", self.sender.name);
                Some(state)
            }
            Err(_) => {
                warn!("xrpipe-{} panicked", self.sender.name);
                None
            }
        }
    }
}

impl<S> Drop for StageContext<S> {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.sender.tx.send(Message::Stop);
            let _ = join.join();
        }
    }
}

fn run<S>(rx: Receiver<Message<S>>, mut state: S) -> S {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(task) => task(&mut state),
            Message::Stop => break,
        }
    }
    state
}

/// Creates a single-slot channel between two stages. At most one snapshot can
/// be pending on a boundary; a second send waits for the consumer.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

#[derive(Debug)]
pub struct HandoffSender<T> {
    tx: SyncSender<T>,
}

impl<T> HandoffSender<T> {
    pub fn send(&self, value: T) -> VrResult<()> {
        self.tx
            .send(value)
            .map_err(|_| VrError::StageClosed("hand-off receiver dropped".into()))
    }
}

#[derive(Debug)]
pub struct HandoffReceiver<T> {
    rx: Receiver<T>,
}

impl<T> HandoffReceiver<T> {
    /// Takes the pending value, if one has been sent.
    pub fn take(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
