use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ks_core::HostContext;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static AMBIENT: RefCell<Option<Arc<dyn HostContext>>> = const { RefCell::new(None) };
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Host context of the invocation running script code on this thread.
pub(crate) fn current_host() -> Option<Arc<dyn HostContext>> {
    AMBIENT.with(|slot| slot.borrow().clone())
}

/// Binds a host context for the lifetime of the guard and restores the
/// previous binding on drop.
pub(crate) struct AmbientGuard {
    previous: Option<Arc<dyn HostContext>>,
}

impl AmbientGuard {
    pub(crate) fn bind(host: Arc<dyn HostContext>) -> Self {
        let previous = AMBIENT.with(|slot| slot.replace(Some(host)));
        Self { previous }
    }
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Non-zero id of the calling thread, stable for the thread's lifetime.
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            token.set(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// Marks the environment as owned by the current thread until dropped.
pub(crate) struct OwnerGuard<'a> {
    owner: &'a AtomicU64,
}

impl<'a> OwnerGuard<'a> {
    pub(crate) fn claim(owner: &'a AtomicU64, token: u64) -> Self {
        owner.store(token, Ordering::Release);
        Self { owner }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.owner.store(0, Ordering::Release);
    }
}
