//! Fixed set of recognition threads for time-bounded attempts.
//!
//! Jobs go through a bounded queue. A recognizer that hangs keeps its worker
//! busy, and once every worker and queue slot is taken new attempts fail
//! immediately instead of piling up more threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use tracing::debug;

use super::strategy::{run_strategies, RecognitionStrategy};
use crate::error::Error;

type Reply = Result<Option<String>, Error>;

struct Job {
    vehicle: RgbImage,
    reply: Sender<Reply>,
}

pub struct RecognitionPool {
    jobs: Sender<Job>,
    workers: usize,
}

impl RecognitionPool {
    /// Starts `workers` threads (at least one) sharing a queue of the same
    /// size. The threads exit once the pool is dropped and their current
    /// job returns.
    pub fn start(
        strategies: Arc<[Box<dyn RecognitionStrategy>]>,
        workers: usize,
    ) -> Result<Self, Error> {
        let workers = workers.max(1);
        let (jobs, queue) = channel::bounded::<Job>(workers);

        for index in 0..workers {
            let queue = queue.clone();
            let strategies = strategies.clone();

            thread::Builder::new()
                .name(format!("plate-recognition-{}", index))
                .spawn(move || {
                    for job in queue {
                        // The caller is gone once its attempt has timed out.
                        let _ = job.reply.send(run_strategies(&strategies, &job.vehicle));
                    }
                })?;
        }

        debug!(workers, "recognition workers started");

        Ok(Self { jobs, workers })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs the strategy chain on a worker, waiting at most `limit` including
    /// time spent queued.
    pub fn recognize(&self, vehicle: &RgbImage, limit: Duration) -> Reply {
        let (reply, result) = channel::bounded(1);
        let job = Job {
            vehicle: vehicle.clone(),
            reply,
        };

        self.jobs.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => {
                Error::RecognitionFailed("all recognition workers are busy".into())
            }
            TrySendError::Disconnected(_) => {
                Error::RecognitionFailed("recognition workers have stopped".into())
            }
        })?;

        match result.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::RecognitionTimeout(limit)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::RecognitionFailed(
                "recognition worker exited without a result".into(),
            )),
        }
    }
}
