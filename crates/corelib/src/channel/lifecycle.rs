//! Reference-counted open/close.
//!
//! The first `open` runs the channel's `do_open` hook, the last `close` runs
//! `do_close`. While a hook is in flight its completion is parked in the
//! channel's [`Lifecycle`](super::base::Lifecycle) so concurrent callers await
//! the same operation instead of starting another one. An `open` that races a
//! draining `close` (and the other way round) waits for the drain to settle
//! before it is re-evaluated.
//!
//! Hooks run on spawned Tokio tasks, so these methods must be called from
//! within a runtime. Dropping a completion never cancels the hook.

use super::Channel;
use crate::error::{Error, Result};
use futures_util::future::{self, BoxFuture, Shared};
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Outcome of an in-flight open or close, awaitable by any number of callers.
pub type Completion = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Copy, Clone, Debug)]
enum Hook {
    Open,
    Close,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Open => f.write_str("open"),
            Hook::Close => f.write_str("close"),
        }
    }
}

/// Lifecycle entry points for shared channel handles.
pub trait ChannelExt {
    /// Take an open reference on the channel.
    fn open(&self) -> BoxFuture<'static, Result<()>>;

    /// Release an open reference on the channel.
    fn close(&self) -> BoxFuture<'static, Result<()>>;

    /// Outstanding open references.
    fn use_count(&self) -> usize;
}

impl<C: Channel + ?Sized> ChannelExt for Arc<C> {
    fn use_count(&self) -> usize {
        self.base().use_count()
    }

    fn open(&self) -> BoxFuture<'static, Result<()>> {
        let mut state = self.base().lifecycle.lock();

        if let Some(closing) = state.closing.clone() {
            drop(state);
            tracing::debug!(channel_id = self.unique_id(), "open waiting for close to drain");
            let this = Arc::clone(self);
            return async move {
                let _ = closing.await;
                this.open().await
            }
            .boxed();
        }

        state.use_count += 1;
        if state.use_count == 1 {
            assert!(
                state.opening.is_none(),
                "bookkeeping error: second first-open on channel {}",
                self.unique_id()
            );
            let completion = run_hook(Arc::clone(self), Hook::Open);
            state.opening = Some(completion.clone());
            completion.boxed()
        } else if let Some(opening) = state.opening.clone() {
            opening.boxed()
        } else {
            future::ready(Ok(())).boxed()
        }
    }

    fn close(&self) -> BoxFuture<'static, Result<()>> {
        let mut state = self.base().lifecycle.lock();

        if let Some(opening) = state.opening.clone() {
            drop(state);
            tracing::debug!(channel_id = self.unique_id(), "close waiting for open to settle");
            let this = Arc::clone(self);
            return async move {
                let _ = opening.await;
                this.close().await
            }
            .boxed();
        }

        if state.use_count == 0 {
            return match state.closing.clone() {
                Some(closing) => closing.boxed(),
                None => future::ready(Err(Error::NotOpen(self.unique_id().to_string()))).boxed(),
            };
        }

        state.use_count -= 1;
        if state.use_count == 0 {
            assert!(
                state.closing.is_none(),
                "bookkeeping error: second last-close on channel {}",
                self.unique_id()
            );
            let completion = run_hook(Arc::clone(self), Hook::Close);
            state.closing = Some(completion.clone());
            completion.boxed()
        } else {
            future::ready(Ok(())).boxed()
        }
    }
}

/// Spawn `hook` on `channel`, clearing the in-flight slot when it settles.
///
/// A failed open resets the count to zero: every caller counted in it is
/// awaiting this same failure.
fn run_hook<C: Channel + ?Sized>(channel: Arc<C>, hook: Hook) -> Completion {
    let task = tokio::spawn(async move {
        tracing::debug!(channel_id = channel.unique_id(), %hook, "running channel hook");
        let operation = match hook {
            Hook::Open => channel.do_open(),
            Hook::Close => channel.do_close(),
        };
        let result = AssertUnwindSafe(operation)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Failed(format!("{} hook panicked", hook))));

        {
            let mut state = channel.base().lifecycle.lock();
            match hook {
                Hook::Open => {
                    state.opening = None;
                    if result.is_err() {
                        state.use_count = 0;
                    }
                }
                Hook::Close => state.closing = None,
            }
        }

        if let Err(e) = &result {
            tracing::warn!(channel_id = channel.unique_id(), %hook, error = %e, "channel hook failed");
        }
        result
    });

    async move {
        task.await
            .unwrap_or_else(|e| Err(Error::Failed(format!("channel task aborted: {}", e))))
    }
    .boxed()
    .shared()
}
