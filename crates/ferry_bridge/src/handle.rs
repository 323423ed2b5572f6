//! Reference-counted engine handles
//!
//! Every engine resource the bridge holds outside an active scope lives in the
//! owning context's [`HandleTable`]. Native code never sees the slot itself,
//! only an [`OwnedHandle`] that acquires on `try_clone` and releases on drop.

use crate::error::{BridgeError, Result};
use rquickjs::{Ctx, Persistent, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one bridge context, unique for the process lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Context,
    Value,
    PropertyId,
}

/// Slot reference with generation counter.
///
/// Format: [32-bit index | 32-bit generation]. The generation is bumped every
/// time a slot is freed, so a stale id never aliases a reused slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }
}

/// What a slot keeps alive inside the engine.
pub(crate) enum Payload {
    /// Marker for the context's own handle; the engine context is owned by
    /// the bridge context itself.
    Context,
    Engine(Persistent<Value<'static>>),
}

struct Entry {
    payload: Payload,
    refs: u32,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Handle accounting for one context.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HandleStats {
    /// Slots currently holding an engine resource.
    pub live: usize,
    /// Acquisitions, including the initial one of each handle.
    pub acquired: u64,
    pub released: u64,
}

pub(crate) struct HandleTable {
    context: ContextId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: HandleStats,
    closed: bool,
    fault: Option<String>,
}

impl HandleTable {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            slots: Vec::new(),
            free: Vec::new(),
            stats: HandleStats::default(),
            closed: false,
            fault: None,
        }
    }

    pub fn insert(&mut self, kind: HandleKind, payload: Payload) -> Result<HandleId> {
        if self.closed {
            return Err(self.closed_error());
        }
        let entry = Entry {
            payload,
            refs: 1,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                HandleId {
                    index,
                    generation: 0,
                }
            }
        };
        self.stats.live += 1;
        self.stats.acquired += 1;
        tracing::trace!(context = %self.context, handle = id.to_bits(), ?kind, "handle created");
        Ok(id)
    }

    pub fn acquire(&mut self, id: HandleId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.refs = entry.refs.checked_add(1).ok_or_else(|| {
            BridgeError::Engine(format!("reference count overflow on handle {}", id.to_bits()))
        })?;
        self.stats.acquired += 1;
        Ok(())
    }

    /// Drops one reference. Returns the payload when the count reaches zero;
    /// the caller drops it once the table borrow has ended.
    pub fn release(&mut self, id: HandleId) -> Result<Option<Payload>> {
        if self.closed {
            // Teardown already freed every payload.
            return Ok(None);
        }
        let entry = self.entry_mut(id)?;
        entry.refs -= 1;
        let emptied = entry.refs == 0;
        self.stats.released += 1;
        if !emptied {
            return Ok(None);
        }

        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.stats.live -= 1;
        tracing::trace!(context = %self.context, handle = id.to_bits(), "handle freed");
        Ok(entry.map(|entry| entry.payload))
    }

    pub fn persistent(&self, id: HandleId) -> Result<Persistent<Value<'static>>> {
        match &self.entry(id)?.payload {
            Payload::Engine(value) => Ok(value.clone()),
            Payload::Context => Err(BridgeError::Engine(format!(
                "handle {} does not refer to an engine value",
                id.to_bits()
            ))),
        }
    }

    pub fn refs(&self, id: HandleId) -> Result<u32> {
        Ok(self.entry(id)?.refs)
    }

    pub fn stats(&self) -> HandleStats {
        self.stats
    }

    pub fn record_fault(&mut self, fault: String) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    pub fn take_fault(&mut self) -> Option<BridgeError> {
        self.fault.take().map(BridgeError::Engine)
    }

    /// Frees every payload. Afterwards releases are no-ops and lookups fail.
    pub fn close(&mut self) -> Vec<Payload> {
        self.closed = true;
        self.free.clear();
        self.stats.live = 0;
        self.slots
            .drain(..)
            .filter_map(|slot| slot.entry.map(|entry| entry.payload))
            .collect()
    }

    fn closed_error(&self) -> BridgeError {
        BridgeError::Engine(format!("{} has been torn down", self.context))
    }

    fn entry(&self, id: HandleId) -> Result<&Entry> {
        if self.closed {
            return Err(self.closed_error());
        }
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| BridgeError::Engine(format!("stale handle {}", id.to_bits())))
    }

    fn entry_mut(&mut self, id: HandleId) -> Result<&mut Entry> {
        if self.closed {
            return Err(self.closed_error());
        }
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| BridgeError::Engine(format!("stale handle {}", id.to_bits())))
    }
}

pub(crate) type SharedTable = Rc<RefCell<HandleTable>>;

/// Owning wrapper around one reference to an engine handle.
///
/// `try_clone` acquires a new reference, moving the wrapper does not, and
/// dropping it releases exactly once.
pub struct OwnedHandle {
    id: HandleId,
    kind: HandleKind,
    context: ContextId,
    table: Weak<RefCell<HandleTable>>,
}

impl OwnedHandle {
    pub(crate) fn create(table: &SharedTable, kind: HandleKind, payload: Payload) -> Result<Self> {
        let mut borrowed = table
            .try_borrow_mut()
            .map_err(|_| BridgeError::Engine("handle table is busy".to_string()))?;
        let context = borrowed.context;
        let id = borrowed.insert(kind, payload)?;
        Ok(Self {
            id,
            kind,
            context,
            table: Rc::downgrade(table),
        })
    }

    pub(crate) fn persist<'js>(
        table: &SharedTable,
        ctx: &Ctx<'js>,
        kind: HandleKind,
        value: Value<'js>,
    ) -> Result<Self> {
        Self::create(table, kind, Payload::Engine(Persistent::save(ctx, value)))
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Current engine reference count of the underlying handle.
    pub fn refs(&self) -> Result<u32> {
        let table = self.table()?;
        let refs = table.borrow().refs(self.id);
        refs
    }

    /// Acquires another reference to the same engine handle.
    pub fn try_clone(&self) -> Result<Self> {
        let table = self.table()?;
        table
            .try_borrow_mut()
            .map_err(|_| BridgeError::Engine("handle table is busy".to_string()))?
            .acquire(self.id)?;
        Ok(Self {
            id: self.id,
            kind: self.kind,
            context: self.context,
            table: self.table.clone(),
        })
    }

    /// Releases this reference, reporting a failed release to the caller.
    pub fn release(mut self) -> Result<()> {
        let result = self.release_ref();
        // Detached so the destructor has nothing left to release.
        self.table = Weak::new();
        result
    }

    pub(crate) fn restore<'js>(&self, ctx: &Ctx<'js>, expected: ContextId) -> Result<Value<'js>> {
        if self.context != expected {
            return Err(BridgeError::cross_context(expected, self.context));
        }
        let table = self.table()?;
        let persistent = table.borrow().persistent(self.id)?;
        Ok(persistent.restore(ctx)?)
    }

    fn table(&self) -> Result<SharedTable> {
        self.table
            .upgrade()
            .ok_or_else(|| BridgeError::Engine(format!("{} has been released", self.context)))
    }

    fn release_ref(&self) -> Result<()> {
        let Some(table) = self.table.upgrade() else {
            // The whole context is gone; its teardown freed every payload.
            return Ok(());
        };
        let payload = table
            .try_borrow_mut()
            .map_err(|_| BridgeError::Engine("handle table is busy".to_string()))?
            .release(self.id)?;
        drop(payload);
        Ok(())
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release_ref() {
            tracing::error!(context = %self.context, handle = self.id.to_bits(), %err, "handle release failed");
            if let Some(table) = self.table.upgrade() {
                if let Ok(mut table) = table.try_borrow_mut() {
                    table.record_fault(format!("release of handle {} failed: {err}", self.id.to_bits()));
                }
            }
        }
    }
}

impl PartialEq for OwnedHandle {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.id == other.id
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("id", &self.id.to_bits())
            .field("kind", &self.kind)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SharedTable {
        Rc::new(RefCell::new(HandleTable::new(ContextId::next())))
    }

    #[test]
    fn clone_acquires_and_drop_releases() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        assert_eq!(handle.refs().unwrap(), 1);

        let copy = handle.try_clone().unwrap();
        assert_eq!(handle.refs().unwrap(), 2);
        assert_eq!(copy, handle);

        drop(copy);
        assert_eq!(handle.refs().unwrap(), 1);

        drop(handle);
        let stats = table.borrow().stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.acquired, stats.released);
    }

    #[test]
    fn moving_does_not_acquire() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        let moved = vec![handle];
        assert_eq!(moved[0].refs().unwrap(), 1);
        assert_eq!(table.borrow().stats().acquired, 1);
    }

    #[test]
    fn explicit_release_reports_once() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        handle.release().unwrap();
        let stats = table.borrow().stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let table = table();
        let first = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        let stale = first.id();
        drop(first);

        let second = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        assert_eq!(second.id().index(), stale.index());
        assert_ne!(second.id().generation(), stale.generation());
        assert!(table.borrow().refs(stale).is_err());
    }

    #[test]
    fn closed_table_rejects_access_but_tolerates_release() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        let freed = table.borrow_mut().close();
        assert_eq!(freed.len(), 1);

        assert!(matches!(handle.try_clone(), Err(BridgeError::Engine(_))));
        assert!(handle.release().is_ok());
        assert!(table.borrow_mut().take_fault().is_none());
    }

    #[test]
    fn failed_drop_release_is_recorded_as_fault() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        let freed = table.borrow_mut().release(handle.id()).unwrap();
        assert!(freed.is_some());

        drop(handle);
        let fault = table.borrow_mut().take_fault();
        assert!(matches!(fault, Some(BridgeError::Engine(ref message)) if message.contains("stale handle")));
        assert!(table.borrow_mut().take_fault().is_none());
    }

    #[test]
    fn handles_outliving_their_table_release_quietly() {
        let table = table();
        let handle = OwnedHandle::create(&table, HandleKind::Context, Payload::Context).unwrap();
        drop(table);
        assert!(handle.refs().is_err());
        drop(handle);
    }

    #[test]
    fn context_ids_are_unique() {
        let a = ContextId::next();
        let b = ContextId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}
