//! Handing assembled messages to a [`Sender`], either inline or through the
//! process-wide background queue.

use std::{
    fmt, io,
    sync::{Arc, LazyLock},
    thread,
    time::Instant,
};

use tokio::sync::{mpsc, oneshot};

use crate::{error::DeliveryError, message::OutboundMessage, outgoing, sender::Sender};

/// Whether [`DeliveryChannel::deliver`] sends inline or queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Send before returning; sender failures reach the caller.
    #[default]
    Synchronous,
    /// Queue for the background worker; sender failures are only logged.
    Queued,
}

impl DeliveryMode {
    #[must_use]
    pub const fn from_threaded(threaded: bool) -> Self {
        if threaded { Self::Queued } else { Self::Synchronous }
    }
}

/// Delivers messages with one sender, in one mode.
#[derive(Clone)]
pub struct DeliveryChannel {
    mode: DeliveryMode,
    sender: Arc<dyn Sender>,
}

impl DeliveryChannel {
    #[must_use]
    pub fn new(mode: DeliveryMode, sender: Arc<dyn Sender>) -> Self {
        Self { mode, sender }
    }

    #[must_use]
    pub const fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Send `message`, or queue it for the background worker.
    ///
    /// # Errors
    ///
    /// In synchronous mode, returns the sender's error. In queued mode, only
    /// fails if the worker could not be started or has stopped.
    pub async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
        let start = Instant::now();

        match self.mode {
            DeliveryMode::Synchronous => {
                self.sender
                    .send(&message.from, &message.recipients, &message.message)
                    .await?;
            }
            DeliveryMode::Queued => {
                DeliveryQueue::global()?.enqueue(Arc::clone(&self.sender), message)?;
            }
        }

        outgoing!(
            level = DEBUG,
            "Notification handed to {:?} delivery in {:?}",
            self.mode,
            start.elapsed()
        );

        Ok(())
    }
}

impl fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

enum Job {
    Send {
        sender: Arc<dyn Sender>,
        message: OutboundMessage,
    },
    /// Answered once every job queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

/// An unbounded FIFO drained by a single worker thread.
///
/// The worker runs its own current-thread runtime, so it keeps going no
/// matter which runtime (if any) the producers use. It lives until every
/// handle to the queue is gone, which for [`DeliveryQueue::global`] is the
/// end of the process.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

static GLOBAL_QUEUE: LazyLock<Result<DeliveryQueue, String>> =
    LazyLock::new(|| DeliveryQueue::spawn().map_err(|err| err.to_string()));

impl DeliveryQueue {
    /// Start a new queue and its worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread could not be created.
    pub fn spawn() -> io::Result<Self> {
        let (jobs, mut pending) = mpsc::unbounded_channel::<Job>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        thread::Builder::new()
            .name("empath-notify-delivery".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = pending.recv().await {
                        match job {
                            Job::Send { sender, message } => {
                                if let Err(err) = sender
                                    .send(&message.from, &message.recipients, &message.message)
                                    .await
                                {
                                    outgoing!(
                                        level = ERROR,
                                        "Failed to send notification to {}: {}",
                                        message.recipients.join(", "),
                                        err
                                    );
                                }
                            }
                            Job::Flush(done) => {
                                let _ = done.send(());
                            }
                        }
                    }
                    outgoing!(level = DEBUG, "Delivery queue closed, worker exiting");
                });
            })?;

        Ok(Self { jobs })
    }

    /// The process-wide queue, started on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker could not be started; later calls
    /// report the same failure.
    pub fn global() -> Result<&'static Self, DeliveryError> {
        GLOBAL_QUEUE
            .as_ref()
            .map_err(|err| DeliveryError::WorkerUnavailable(err.clone()))
    }

    /// Queue `message` for delivery with `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped.
    pub fn enqueue(
        &self,
        sender: Arc<dyn Sender>,
        message: OutboundMessage,
    ) -> Result<(), DeliveryError> {
        self.jobs
            .send(Job::Send { sender, message })
            .map_err(|_| DeliveryError::QueueClosed)
    }

    /// Wait until everything queued so far has been handed to its sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped.
    pub async fn flush(&self) -> Result<(), DeliveryError> {
        let (done, flushed) = oneshot::channel();
        self.jobs
            .send(Job::Flush(done))
            .map_err(|_| DeliveryError::QueueClosed)?;

        flushed.await.map_err(|_| DeliveryError::QueueClosed)
    }
}
