//! Single-value cache that serves stale data while refreshing in the
//! background.

use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

type Loader<T> = dyn Fn() -> Result<T> + Send + Sync;

struct Slot<T> {
    value: Option<T>,
    refreshed_at: Option<Instant>,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    refresh: Mutex<()>,
    ttl: Duration,
    loader: Box<Loader<T>>,
}

/// Holds one value loaded by `loader`.
///
/// The first read loads synchronously. Later reads return the cached value
/// immediately; a read that finds it older than `ttl` starts one background
/// refresh and still returns the old value.
pub struct RefreshingCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RefreshingCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RefreshingCache<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F>(ttl: Duration, loader: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    value: None,
                    refreshed_at: None,
                }),
                refresh: Mutex::new(()),
                ttl,
                loader: Box::new(loader),
            }),
        }
    }

    pub fn get(&self) -> Result<T> {
        let (cached, stale) = {
            let slot = self.inner.lock_slot();
            (slot.value.clone(), self.inner.is_stale(&slot))
        };

        match cached {
            Some(value) => {
                if stale {
                    self.spawn_refresh();
                }
                Ok(value)
            }
            None => {
                let _guard = self.inner.lock_refresh();
                if let Some(value) = self.inner.lock_slot().value.clone() {
                    return Ok(value);
                }
                self.inner.load()
            }
        }
    }

    fn spawn_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let Ok(_guard) = inner.refresh.try_lock() else {
                return;
            };
            if !inner.is_stale(&inner.lock_slot()) {
                return;
            }
            if let Err(err) = inner.load() {
                tracing::warn!("background cache refresh failed: {err}");
            }
        });
    }
}

impl<T: Clone> Inner<T> {
    fn lock_slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_stale(&self, slot: &Slot<T>) -> bool {
        slot.refreshed_at
            .is_none_or(|refreshed_at| refreshed_at.elapsed() >= self.ttl)
    }

    fn load(&self) -> Result<T> {
        let value = (self.loader)()?;
        let mut slot = self.lock_slot();
        slot.value = Some(value.clone());
        slot.refreshed_at = Some(Instant::now());
        Ok(value)
    }
}
