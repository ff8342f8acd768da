//! Resizable permit pool
//!
//! Wraps a tokio [`Semaphore`] so that capacity can shrink without revoking
//! permits that are already held. Shrinking first forgets idle permits; any
//! remainder is recorded as a debt that is paid down as outstanding permits
//! are released.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Permit acquisition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PermitError {
    /// The context passed to [`PermitPool::acquire`] was cancelled
    #[error("permit acquisition cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    /// Permits still to be retired once their holders release them
    pending_shrink: usize,
}

#[derive(Debug)]
struct PoolInner {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut state = self.state.lock();
        if state.pending_shrink > 0 {
            state.pending_shrink -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

/// Bounded counting semaphore with a resizable capacity
///
/// Used twice per worker: the task pool caps concurrently processing tasks
/// and the poller pool caps concurrently active poll attempts.
///
/// # Example
///
/// ```
/// use taskpoll::concurrency::PermitPool;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let pool = PermitPool::new("tasks", 2);
/// let ctx = CancellationToken::new();
///
/// let permit = pool.acquire(&ctx).await.unwrap();
/// assert_eq!(pool.outstanding(), 1);
///
/// drop(permit);
/// assert_eq!(pool.outstanding(), 0);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct PermitPool {
    inner: Arc<PoolInner>,
}

impl PermitPool {
    /// Create a pool with `capacity` free slots
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                semaphore: Arc::new(Semaphore::new(capacity)),
                state: Mutex::new(PoolState {
                    capacity,
                    pending_shrink: 0,
                }),
            }),
        }
    }

    /// Wait for a free slot
    ///
    /// Returns [`PermitError::Cancelled`] as soon as `ctx` is cancelled,
    /// including when it was already cancelled on entry.
    pub async fn acquire(&self, ctx: &CancellationToken) -> Result<Permit, PermitError> {
        if ctx.is_cancelled() {
            return Err(PermitError::Cancelled);
        }

        let semaphore = Arc::clone(&self.inner.semaphore);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PermitError::Cancelled),
            // The semaphore is never closed, so an error here cannot happen
            // in practice; report it as a cancellation regardless.
            acquired = semaphore.acquire_owned() => acquired
                .map(|permit| self.wrap(permit))
                .map_err(|_| PermitError::Cancelled),
        }
    }

    /// Take a free slot without waiting
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.wrap(permit))
    }

    /// Change the capacity
    ///
    /// Growing makes new slots available immediately. Shrinking only reduces
    /// future availability: held permits stay valid and are retired as they
    /// are released.
    pub fn resize(&self, new_capacity: usize) {
        let mut state = self.inner.state.lock();
        let old_capacity = state.capacity;

        if new_capacity > old_capacity {
            let grow = new_capacity - old_capacity;
            let absorbed = grow.min(state.pending_shrink);
            state.pending_shrink -= absorbed;
            self.inner.semaphore.add_permits(grow - absorbed);
        } else if new_capacity < old_capacity {
            let shrink = old_capacity - new_capacity;
            let forgotten = self.inner.semaphore.forget_permits(shrink);
            state.pending_shrink += shrink - forgotten;
        }

        state.capacity = new_capacity;
        tracing::trace!(
            pool = self.inner.name,
            from = old_capacity,
            to = new_capacity,
            pending_shrink = state.pending_shrink,
            "Permit pool resized"
        );
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Number of permits currently held
    pub fn outstanding(&self) -> usize {
        let state = self.inner.state.lock();
        (state.capacity + state.pending_shrink)
            .saturating_sub(self.inner.semaphore.available_permits())
    }

    /// Number of slots that can be acquired without waiting
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Pool name used in logs and metrics
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> Permit {
        Permit {
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A held slot; returned to its pool when dropped
#[derive(Debug)]
pub struct Permit {
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl Permit {
    /// Return the slot explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.release(permit);
        }
    }
}
