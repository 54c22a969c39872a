//! # Teardown
//!
//! Work to do when the embedding side goes away: typically destroying the
//! scopes this runtime created in its peer.
//!
//! Hooks run in registration order, each once. `run()` drains the list, so
//! hooks registered afterwards wait for the next `run()`.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A shared list of teardown hooks. Clones share the list.
#[derive(Clone, Default)]
pub struct Teardown {
    hooks: Arc<Mutex<Vec<Hook>>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lock().push(Box::new(move || hook().boxed()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs and forgets every registered hook.
    pub async fn run(&self) {
        let hooks = std::mem::take(&mut *self.lock());
        debug!(count = hooks.len(), "running teardown hooks");
        for hook in hooks {
            hook().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Hook>> {
        self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
