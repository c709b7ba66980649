//! Rendering context pool
//!
//! Rendering contexts (browser contexts, HTTP sessions with their own cookie jars) are
//! expensive to create and must never leak state between uses. This module provides a
//! bounded pool of such contexts:
//!
//! - `RenderEngine`: launches the shared engine once and creates contexts from it
//! - `RenderContext`: one isolated context whose per-use state can be cleared
//! - `ContextPool`: bounded, lazily launched pool handing out `ContextLease`s
//! - `HttpSessionEngine`: the engine used by the built-in strategies

mod context_pool;
mod http_engine;

pub use context_pool::{ContextLease, ContextPool};
pub use http_engine::{HttpSession, HttpSessionEngine, SessionCookies, SessionSettings};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the resource pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to launch rendering engine: {0}")]
    Launch(String),

    #[error("Failed to create rendering context: {0}")]
    Context(String),

    #[error("Failed to clear rendering context: {0}")]
    ClearState(String),

    #[error("Lease was already released")]
    Released,

    #[error("Resource pool is closed")]
    Closed,
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// An engine that produces isolated rendering contexts
///
/// `launch` is expensive (think: starting a browser process) and is called at most once
/// per pool; contexts are then created from the launched handle.
#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    /// Handle to the launched engine
    type Handle: Send + Sync + 'static;

    /// Context type handed out by the pool
    type Context: RenderContext;

    async fn launch(&self) -> PoolResult<Self::Handle>;

    async fn new_context(&self, handle: &Self::Handle) -> PoolResult<Self::Context>;

    /// Releases the launched engine; every context is already closed when this runs
    async fn shutdown(&self, handle: &Self::Handle);
}

/// One isolated rendering context
#[async_trait]
pub trait RenderContext: Send + Sync + 'static {
    /// Drops cookies, storage and any other state left by the previous holder
    async fn clear_state(&self) -> PoolResult<()>;

    async fn close(&self);
}

/// Pool of HTTP sessions used by the built-in strategies
pub type SessionPool = ContextPool<HttpSessionEngine>;
