//! Generation-checked handle registry.
//!
//! Callers hold opaque [`Handle`] values instead of references to session
//! state. A handle packs a slot index and a generation counter; the
//! generation is bumped every time a slot is vacated, so a handle from a
//! finalized session can never alias a newer session that happens to reuse
//! the slot.
//!
//! Teardown is deferred: [`Registry::destroy`] marks the slot, and the
//! entry's [`OnLastRelease`] hook runs only once the last outstanding
//! [`HandleRef`] drops. The hook is always invoked outside the registry
//! lock.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Opaque session handle.
///
/// Handles are plain data: `Copy`, comparable, and safe to stash anywhere.
/// A handle is only meaningful to the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    fn new(index: usize, generation: u32) -> Self {
        Self((index as u64) << 32 | u64::from(generation))
    }

    fn index(self) -> usize {
        (self.0 >> 32) as usize
    }

    fn generation(self) -> u32 {
        self.0 as u32
    }

    /// Raw handle value, for logging.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Teardown hook invoked when the last reference to a destroyed entry drops.
pub(crate) trait OnLastRelease {
    /// Called exactly once per entry, never under the registry lock.
    fn on_last_release(&self);
}

struct Entry<T> {
    value: Arc<T>,
    /// Outstanding [`HandleRef`] guards.
    refs: usize,
    destroy_pending: bool,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Slot arena mapping handles to live entries.
pub(crate) struct Registry<T: OnLastRelease> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T: OnLastRelease> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Registers a value and issues a handle for it.
    pub(crate) fn create(&self, value: Arc<T>) -> Handle {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let entry = Entry {
            value,
            refs: 0,
            destroy_pending: false,
        };
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.entry.is_none() {
                slot.entry = Some(entry);
                return Handle::new(index, slot.generation);
            }
        }
        slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        Handle::new(slots.len() - 1, 0)
    }

    /// Resolves a handle to a reference-counted guard.
    ///
    /// Resolution succeeds while the entry exists, including after
    /// [`Registry::destroy`] has marked it; operations past finalize are
    /// rejected at the session layer, not here, so in-flight calls can
    /// observe a consistent shutdown.
    pub(crate) fn get(&self, handle: Handle) -> Result<HandleRef<'_, T>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get_mut(handle.index()).ok_or(Error::BadHandle)?;
        if slot.generation != handle.generation() {
            return Err(Error::BadHandle);
        }
        let entry = slot.entry.as_mut().ok_or(Error::BadHandle)?;
        entry.refs += 1;
        let value = Arc::clone(&entry.value);
        Ok(HandleRef {
            registry: self,
            handle,
            value,
        })
    }

    /// Marks an entry for teardown.
    ///
    /// The entry is removed (and its hook run) as soon as no guards remain,
    /// which may be immediately. A second destroy of the same handle fails
    /// with [`Error::BadHandle`].
    pub(crate) fn destroy(&self, handle: Handle) -> Result<()> {
        let released = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots.get_mut(handle.index()).ok_or(Error::BadHandle)?;
            if slot.generation != handle.generation() {
                return Err(Error::BadHandle);
            }
            let entry = slot.entry.as_mut().ok_or(Error::BadHandle)?;
            if entry.destroy_pending {
                return Err(Error::BadHandle);
            }
            entry.destroy_pending = true;
            if entry.refs == 0 {
                Self::vacate(slot)
            } else {
                None
            }
        };
        if let Some(value) = released {
            value.on_last_release();
        }
        Ok(())
    }

    /// Drops one guard reference; runs the teardown hook if this was the
    /// last reference to a destroyed entry.
    fn put(&self, handle: Handle) {
        let released = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let Some(slot) = slots.get_mut(handle.index()) else {
                return;
            };
            if slot.generation != handle.generation() {
                return;
            }
            let Some(entry) = slot.entry.as_mut() else {
                return;
            };
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 && entry.destroy_pending {
                Self::vacate(slot)
            } else {
                None
            }
        };
        if let Some(value) = released {
            value.on_last_release();
        }
    }

    fn vacate(slot: &mut Slot<T>) -> Option<Arc<T>> {
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(entry.value)
    }
}

/// RAII guard pinning a registry entry alive for the duration of one call.
pub(crate) struct HandleRef<'a, T: OnLastRelease> {
    registry: &'a Registry<T>,
    handle: Handle,
    value: Arc<T>,
}

impl<T: OnLastRelease> Deref for HandleRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: OnLastRelease> Drop for HandleRef<'_, T> {
    fn drop(&mut self) {
        self.registry.put(self.handle);
    }
}
