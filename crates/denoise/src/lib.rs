use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use model::{Revision, TileImage, VirtualTileCoordinate};

mod neighborhood;

pub use neighborhood::{DENOISE_TILE_PROXIMITY, NeighborhoodImage};

/// Black-box filter run on the worker thread. Only the centre tile of the result is kept.
pub trait TileDenoiser: Send + Sync + 'static {
    fn denoise(&self, neighborhood: &mut NeighborhoodImage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoiseError {
    WorkerSpawn(std::io::ErrorKind),
}

impl fmt::Display for DenoiseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenoiseError::WorkerSpawn(kind) => {
                write!(formatter, "failed to spawn denoise worker: {kind}")
            }
        }
    }
}

impl std::error::Error for DenoiseError {}

#[derive(Debug, Default)]
struct JobCompletion {
    finished: AtomicBool,
    result: Mutex<Option<TileImage>>,
}

struct QueuedJob {
    id: u64,
    image: NeighborhoodImage,
    completion: Arc<JobCompletion>,
}

struct JobQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
    notify_sender: Sender<()>,
    notify_receiver: Receiver<()>,
}

impl JobQueue {
    fn wake_worker(&self) {
        match self.notify_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => panic!("denoise notify channel disconnected"),
        }
    }

    fn pop(&self) -> Option<QueuedJob> {
        self.jobs
            .lock()
            .expect("denoise queue mutex should not be poisoned")
            .pop_front()
    }
}

/// Outcome of checking an in-flight denoise group once per tick.
#[derive(Debug, PartialEq)]
pub enum DenoiseStatus {
    Pending,
    /// The group belongs to an older revision and was dropped.
    Stale,
    /// Cancelled before the worker picked it up.
    Retracted,
    /// Cancelled while running; the result was thrown away.
    Discarded,
    Finished(TileImage),
}

/// One submitted tile. Lives on the orchestration thread until its status settles.
#[derive(Debug)]
pub struct DenoiseGroup {
    tile: VirtualTileCoordinate,
    revision: Revision,
    job_id: u64,
    completion: Arc<JobCompletion>,
    should_be_cancelled: bool,
    discard_result: bool,
}

impl DenoiseGroup {
    pub const fn tile(&self) -> VirtualTileCoordinate {
        self.tile
    }

    pub const fn revision(&self) -> Revision {
        self.revision
    }

    pub fn request_cancel(&mut self) {
        self.should_be_cancelled = true;
    }

    pub const fn is_cancel_requested(&self) -> bool {
        self.should_be_cancelled
    }

    /// Non-blocking check of the completion flag. Yields the centre tile once.
    pub fn poll(&mut self) -> Poll<TileImage> {
        if !self.completion.finished.load(Ordering::Acquire) {
            return Poll::Pending;
        }
        let image = self
            .completion
            .result
            .lock()
            .expect("denoise result mutex should not be poisoned")
            .take()
            .expect("denoise result polled after it was taken");
        Poll::Ready(image)
    }
}

/// Single dedicated worker filtering tile neighbourhoods in submission order.
pub struct DenoisePipeline {
    queue: Arc<JobQueue>,
    stop_requested: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
    next_job_id: u64,
}

impl DenoisePipeline {
    pub fn new(denoiser: Arc<dyn TileDenoiser>) -> Result<Self, DenoiseError> {
        let (notify_sender, notify_receiver) = bounded(1);
        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            notify_sender,
            notify_receiver,
        });
        let stop_requested = Arc::new(AtomicBool::new(false));
        let worker_queue = Arc::clone(&queue);
        let worker_stop_requested = Arc::clone(&stop_requested);
        let join_handle = std::thread::Builder::new()
            .name("denoise".to_owned())
            .spawn(move || denoise_loop(denoiser, worker_queue, worker_stop_requested))
            .map_err(|error| DenoiseError::WorkerSpawn(error.kind()))?;
        Ok(Self {
            queue,
            stop_requested,
            join_handle: Some(join_handle),
            next_job_id: 0,
        })
    }

    pub fn submit(
        &mut self,
        tile: VirtualTileCoordinate,
        revision: Revision,
        image: NeighborhoodImage,
    ) -> DenoiseGroup {
        let id = self.next_job_id;
        self.next_job_id = self.next_job_id.checked_add(1).expect("denoise job id overflow");
        let completion = Arc::new(JobCompletion::default());
        self.queue
            .jobs
            .lock()
            .expect("denoise queue mutex should not be poisoned")
            .push_back(QueuedJob {
                id,
                image,
                completion: Arc::clone(&completion),
            });
        self.queue.wake_worker();
        log::trace!("denoise job {id} queued for {tile:?}");
        DenoiseGroup {
            tile,
            revision,
            job_id: id,
            completion,
            should_be_cancelled: false,
            discard_result: false,
        }
    }

    /// Removes the group's job if the worker has not started it yet.
    pub fn retract(&self, group: &DenoiseGroup) -> bool {
        let mut jobs = self
            .queue
            .jobs
            .lock()
            .expect("denoise queue mutex should not be poisoned");
        match jobs.iter().position(|job| job.id == group.job_id) {
            Some(index) => {
                jobs.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue
            .jobs
            .lock()
            .expect("denoise queue mutex should not be poisoned")
            .len()
    }

    /// Settles cancellation and staleness of `group`, then polls it.
    ///
    /// A cancelled group that already runs keeps running and its result is discarded later.
    pub fn update(&self, group: &mut DenoiseGroup, current_revision: Revision) -> DenoiseStatus {
        if group.revision != current_revision {
            self.retract(group);
            return DenoiseStatus::Stale;
        }
        if group.should_be_cancelled {
            if self.retract(group) {
                log::debug!("denoise job {} retracted", group.job_id);
                return DenoiseStatus::Retracted;
            }
            group.should_be_cancelled = false;
            group.discard_result = true;
        }
        match group.poll() {
            Poll::Pending => DenoiseStatus::Pending,
            Poll::Ready(_) if group.discard_result => DenoiseStatus::Discarded,
            Poll::Ready(image) => DenoiseStatus::Finished(image),
        }
    }
}

impl Drop for DenoisePipeline {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
        self.queue.wake_worker();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.join().expect("join denoise thread");
        }
    }
}

fn denoise_loop(
    denoiser: Arc<dyn TileDenoiser>,
    queue: Arc<JobQueue>,
    stop_requested: Arc<AtomicBool>,
) {
    while !stop_requested.load(Ordering::Acquire) {
        let Some(mut job) = queue.pop() else {
            // Submit and drop both wake the worker after changing what it should see.
            if queue.notify_receiver.recv().is_err() {
                return;
            }
            continue;
        };
        denoiser.denoise(&mut job.image);
        *job
            .completion
            .result
            .lock()
            .expect("denoise result mutex should not be poisoned") = Some(job.image.center_tile());
        job.completion.finished.store(true, Ordering::Release);
    }
}
