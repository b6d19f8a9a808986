//! Frame-tracking promise job queue.
//!
//! Promise reactions run after the synchronous portion of a wrapped call has
//! returned and its frame has been exited. To keep the live bindings correct
//! inside `await` continuations, the queue snapshots the frame that is active
//! when a job is enqueued and re-enters it around the job's execution.

use std::cell::RefCell;
use std::collections::VecDeque;

use boa_engine::job::{FutureJob, JobQueue, NativeJob};
use boa_engine::Context;
use boa_gc::Gc;

use crate::config::RuntimeKind;
use crate::instance::InstanceInner;
use crate::runtime::{current_frame, ContextFrame};

/// FIFO job queue that restores the enqueue-time [`ContextFrame`] around
/// each job.
#[derive(Default)]
pub(crate) struct FrameQueue {
    jobs: RefCell<VecDeque<(NativeJob, Option<ContextFrame>)>>,
    instance: RefCell<Option<Gc<InstanceInner>>>,
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("pending", &self.jobs.borrow().len())
            .finish_non_exhaustive()
    }
}

impl FrameQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Binds the queue to its instance. Called once during construction,
    /// after the shared instance record exists.
    pub(crate) fn attach(&self, inner: Gc<InstanceInner>) {
        *self.instance.borrow_mut() = Some(inner);
    }

    /// Drops the instance binding so shutdown releases the cycle between
    /// queue and instance record.
    pub(crate) fn detach(&self) {
        *self.instance.borrow_mut() = None;
        self.jobs.borrow_mut().clear();
    }

    fn snapshot(&self) -> Option<ContextFrame> {
        let instance = self.instance.borrow();
        let inner = instance.as_ref()?;
        // Only the scoped-storage runtime restores frames around jobs; the
        // live-instance runtime leaves its single slot untouched.
        if inner.runtime_kind() != RuntimeKind::ScopedStorage {
            return None;
        }
        current_frame(inner)
    }
}

impl JobQueue for FrameQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        let frame = self.snapshot();
        self.jobs.borrow_mut().push_back((job, frame));
    }

    fn run_jobs(&self, context: &mut Context) {
        // Deliberately re-entrant: a lazy materialization triggered inside a
        // job pumps this queue again, and the nested drain must make
        // progress for the triggering module load to settle.
        loop {
            let next = self.jobs.borrow_mut().pop_front();
            let Some((job, frame)) = next else { break };
            // Clone the instance handle out of the cell so a job that calls
            // back into the queue (or shuts the instance down) never sees a
            // held borrow.
            let instance = self.instance.borrow().clone();
            let guard = match (instance.as_ref(), frame) {
                (Some(inner), Some(frame)) => Some(crate::runtime::enter_frame(inner, frame)),
                _ => None,
            };
            let result = job.call(context);
            drop(guard);
            if let Err(err) = result {
                // Job failures surface through promise states; the queue
                // itself keeps draining.
                log::trace!("promise job failed: {err}");
            }
        }
    }

    fn enqueue_future_job(&self, future: FutureJob, context: &mut Context) {
        // No async executor in this host: resolve the future on the spot and
        // queue the resulting job.
        let job = futures_lite::future::block_on(future);
        self.enqueue_promise_job(job, context);
    }
}
