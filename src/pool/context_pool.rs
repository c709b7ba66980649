//! Bounded pool of rendering contexts
//!
//! A counting semaphore bounds how many contexts are leased at once; idle contexts are
//! kept for reuse. The engine is launched on the first acquire, exactly once.

use crate::pool::{PoolError, PoolResult, RenderContext, RenderEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct IdleContext<C> {
    context: Arc<C>,
    /// Set when the lease was dropped without an explicit release
    dirty: bool,
}

struct PoolInner<E: RenderEngine> {
    engine: E,
    handle: OnceCell<E::Handle>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleContext<E::Context>>>,
    /// Every context created and not yet discarded, leased or idle
    live: Mutex<Vec<Arc<E::Context>>>,
    max_contexts: usize,
    closed: AtomicBool,
}

impl<E: RenderEngine> PoolInner<E> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push_idle(&self, context: Arc<E::Context>, dirty: bool) {
        if self.is_closed() {
            self.close_detached(context);
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push(IdleContext { context, dirty }),
            Err(_) => self.forget(&context),
        }
    }

    fn pop_idle(&self) -> Option<IdleContext<E::Context>> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn register(&self, context: &Arc<E::Context>) {
        if let Ok(mut live) = self.live.lock() {
            live.push(Arc::clone(context));
        }
    }

    fn forget(&self, context: &Arc<E::Context>) {
        if let Ok(mut live) = self.live.lock() {
            live.retain(|c| !Arc::ptr_eq(c, context));
        }
    }

    /// Closes a context that came back after the pool was closed
    fn close_detached(&self, context: Arc<E::Context>) {
        self.forget(&context);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { context.close().await });
        }
    }
}

/// Bounded pool of reusable rendering contexts
pub struct ContextPool<E: RenderEngine> {
    inner: Arc<PoolInner<E>>,
}

impl<E: RenderEngine> Clone for ContextPool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: RenderEngine> ContextPool<E> {
    /// Creates a pool that leases at most `max_contexts` contexts at a time
    ///
    /// Nothing is launched until the first `acquire`.
    pub fn new(engine: E, max_contexts: usize) -> Self {
        let max_contexts = max_contexts.max(1);
        Self {
            inner: Arc::new(PoolInner {
                engine,
                handle: OnceCell::new(),
                slots: Arc::new(Semaphore::new(max_contexts)),
                idle: Mutex::new(Vec::new()),
                live: Mutex::new(Vec::new()),
                max_contexts,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Leases a context, waiting until a slot is free
    ///
    /// Reused contexts are handed out clean: a context returned by a dropped lease is
    /// cleared here before reuse.
    ///
    /// # Returns
    ///
    /// * `Ok(ContextLease)` - A context owned until the lease is released
    /// * `Err(PoolError)` - The pool is closed, or the engine failed to launch or open
    ///   a context
    pub async fn acquire(&self) -> PoolResult<ContextLease<E>> {
        if self.inner.is_closed() {
            return Err(PoolError::Closed);
        }

        let permit = Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let handle = self
            .inner
            .handle
            .get_or_try_init(|| async {
                info!(max_contexts = self.inner.max_contexts, "Launching rendering engine");
                self.inner.engine.launch().await
            })
            .await?;

        let context = match self.inner.pop_idle() {
            Some(idle) if idle.dirty => match idle.context.clear_state().await {
                Ok(()) => idle.context,
                Err(e) => {
                    warn!(error = %e, "Discarding context that could not be cleared");
                    self.inner.forget(&idle.context);
                    idle.context.close().await;
                    self.create_context(handle).await?
                }
            },
            Some(idle) => idle.context,
            None => self.create_context(handle).await?,
        };

        Ok(ContextLease {
            pool: Arc::clone(&self.inner),
            context: Some(context),
            permit: Some(permit),
        })
    }

    async fn create_context(&self, handle: &E::Handle) -> PoolResult<Arc<E::Context>> {
        let context = Arc::new(self.inner.engine.new_context(handle).await?);
        self.inner.register(&context);
        debug!(created = self.created_count(), "Created rendering context");
        Ok(context)
    }

    /// Closes every pooled and in-flight context and shuts the engine down
    ///
    /// Pending and future `acquire` calls fail with `PoolError::Closed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.slots.close();

        if let Ok(mut idle) = self.inner.idle.lock() {
            idle.clear();
        }
        let live: Vec<Arc<E::Context>> = match self.inner.live.lock() {
            Ok(mut live) => live.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for context in &live {
            context.close().await;
        }

        if let Some(handle) = self.inner.handle.get() {
            self.inner.engine.shutdown(handle).await;
        }
        info!(contexts = live.len(), "Resource pool closed");
    }

    /// Maximum number of concurrently leased contexts
    pub fn max_contexts(&self) -> usize {
        self.inner.max_contexts
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Number of contexts waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Number of live contexts, leased or idle
    pub fn created_count(&self) -> usize {
        self.inner.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    pub fn is_launched(&self) -> bool {
        self.inner.handle.initialized()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Exclusive handle to one pooled context
///
/// Call `release` when done. Dropping the lease also returns the context, but its state
/// is only cleared when it is next acquired.
pub struct ContextLease<E: RenderEngine> {
    pool: Arc<PoolInner<E>>,
    context: Option<Arc<E::Context>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<E: RenderEngine> ContextLease<E> {
    /// The leased context
    pub fn context(&self) -> PoolResult<&E::Context> {
        self.context.as_deref().ok_or(PoolError::Released)
    }

    /// Clears the context and returns it to the pool; further calls are no-ops
    pub async fn release(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };

        if self.pool.is_closed() {
            self.pool.forget(&context);
            context.close().await;
        } else {
            match context.clear_state().await {
                Ok(()) => self.pool.push_idle(context, false),
                Err(e) => {
                    warn!(error = %e, "Discarding context that could not be cleared");
                    self.pool.forget(&context);
                    context.close().await;
                }
            }
        }

        self.permit.take();
    }

    pub fn is_released(&self) -> bool {
        self.context.is_none()
    }
}

impl<E: RenderEngine> Drop for ContextLease<E> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.push_idle(context, true);
        }
    }
}
