//! GL-context-thread dispatcher.
//!
//! One thread owns the GL context; everything that touches textures or
//! framebuffers runs as a job on that thread. [`GlThread::run_sync`] is the
//! choke point: called from another thread it blocks until the job has run,
//! called from the context thread itself it executes the job in place —
//! queueing there would have the owning thread waiting on itself.
//!
//! The context is built *on* the spawned thread by the factory closure, so
//! context types that are not `Send` (the usual case for GL) never cross a
//! thread boundary.

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Sender};

use crate::error::OutputError;
use crate::loge;

type Job<C> = Box<dyn FnOnce(&C) + Send>;

enum Msg<C> {
    Run(Job<C>),
    Stop,
}

thread_local! {
    // Type-erased pointer to the context owned by this thread's dispatch
    // loop, set for the loop's lifetime. Only dereferenced by `run_sync`
    // after confirming the caller is on the owner thread; each spawned
    // thread belongs to exactly one `GlThread<C>`, so the pointee type is
    // always this dispatcher's `C`.
    static ACTIVE_CONTEXT: Cell<Option<NonNull<()>>> = const { Cell::new(None) };
}

/// Handle to the thread that owns a GL context.
///
/// Cheap to share via `Arc`. Dropping the last handle stops the thread and
/// drops the context there; do not drop the last handle from inside a job.
pub struct GlThread<C: 'static> {
    tx: Sender<Msg<C>>,
    owner: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<C: 'static> GlThread<C> {
    /// Spawn the context thread. `factory` runs on the new thread and builds
    /// the context (create the GL context and make it current there). A
    /// factory error is logged and surfaced as `ContextUnavailable`.
    pub fn spawn<F>(factory: F) -> Result<Arc<Self>, OutputError>
    where
        F: FnOnce() -> anyhow::Result<C> + Send + 'static,
    {
        let (tx, rx) = unbounded::<Msg<C>>();
        let (ready_tx, ready_rx) = bounded::<Result<ThreadId, String>>(1);

        let join = thread::Builder::new()
            .name("framecast-gl".to_string())
            .spawn(move || {
                let ctx = match factory() {
                    Ok(c) => {
                        let _ = ready_tx.send(Ok(thread::current().id()));
                        c
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                ACTIVE_CONTEXT.with(|slot| slot.set(Some(NonNull::from(&ctx).cast())));
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Msg::Run(job) => job(&ctx),
                        Msg::Stop => break,
                    }
                }
                ACTIVE_CONTEXT.with(|slot| slot.set(None));
            })
            .map_err(|_| OutputError::ContextUnavailable)?;

        match ready_rx.recv() {
            Ok(Ok(owner)) => Ok(Arc::new(GlThread {
                tx,
                owner,
                join: Mutex::new(Some(join)),
            })),
            Ok(Err(msg)) => {
                loge!("GL", "context factory failed: {msg}");
                let _ = join.join();
                Err(OutputError::ContextUnavailable)
            }
            Err(_) => Err(OutputError::ContextUnavailable),
        }
    }

    /// True when the caller is already executing on the context thread.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run `job` with the context current, blocking until it has finished.
    ///
    /// Reentrant: from inside a job already on the context thread the work
    /// runs synchronously in place instead of being queued.
    pub fn run_sync<R, F>(&self, job: F) -> Result<R, OutputError>
    where
        R: Send + 'static,
        F: FnOnce(&C) -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            let ptr = ACTIVE_CONTEXT
                .with(|slot| slot.get())
                .ok_or(OutputError::ContextUnavailable)?;
            let ctx = unsafe { ptr.cast::<C>().as_ref() };
            return Ok(job(ctx));
        }

        let (done_tx, done_rx) = bounded::<R>(1);
        let boxed: Job<C> = Box::new(move |ctx| {
            let _ = done_tx.send(job(ctx));
        });
        self.tx
            .send(Msg::Run(boxed))
            .map_err(|_| OutputError::ContextUnavailable)?;
        done_rx.recv().map_err(|_| OutputError::ContextUnavailable)
    }

    /// Queue `job` without waiting for it. Best-effort: a dead context
    /// thread drops the job silently.
    pub fn run_detached<F>(&self, job: F)
    where
        F: FnOnce(&C) + Send + 'static,
    {
        let _ = self.tx.send(Msg::Run(Box::new(job)));
    }
}

impl<C: 'static> Drop for GlThread<C> {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Stop);
        let handle = self.join.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            if !self.is_owner_thread() {
                let _ = handle.join();
            }
        }
    }
}
