use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifier of a connected slot, used to disconnect it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

struct Slots<T> {
    next_id: u64,
    slots: Vec<(SlotId, Slot<T>)>,
}

/// A typed observer list
///
/// Front-end objects expose one `Signal` per protocol notification. Cloning a signal gives
/// another handle to the same list of slots.
///
/// Slots are invoked in connection order, on the thread calling [`emit()`](Signal::emit). The
/// slot list is snapshotted before invocation, so a slot may connect or disconnect slots
/// (including itself) on the signal being emitted.
pub struct Signal<T> {
    inner: Arc<Mutex<Slots<T>>>,
}

impl<T> Signal<T> {
    /// Create a signal without any slot
    pub fn new() -> Signal<T> {
        Signal { inner: Arc::new(Mutex::new(Slots { next_id: 0, slots: Vec::new() })) }
    }

    /// Connect a slot, it will be invoked on every subsequent emission
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut guard = self.inner.lock().unwrap();
        let id = SlotId(guard.next_id);
        guard.next_id += 1;
        guard.slots.push((id, Arc::new(slot)));
        id
    }

    /// Disconnect a slot
    ///
    /// Returns `false` if it was not connected to this signal.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let before = guard.slots.len();
        guard.slots.retain(|(slot_id, _)| *slot_id != id);
        guard.slots.len() != before
    }

    /// Disconnect every slot
    pub fn disconnect_all(&self) {
        self.inner.lock().unwrap().slots.clear();
    }

    /// Number of connected slots
    pub fn slot_count(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    /// Invoke every connected slot with `value`
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> =
            self.inner.lock().unwrap().slots.iter().map(|(_, slot)| slot.clone()).collect();
        for slot in slots {
            slot(value);
        }
    }

    /// A handle to this signal that does not keep it alive
    pub fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal { inner: Arc::downgrade(&self.inner) }
    }
}

/// A [`Signal`] handle that does not keep the slot list alive
pub struct WeakSignal<T> {
    inner: Weak<Mutex<Slots<T>>>,
}

impl<T> WeakSignal<T> {
    /// The signal, unless every strong handle to it was dropped
    pub fn upgrade(&self) -> Option<Signal<T>> {
        self.inner.upgrade().map(|inner| Signal { inner })
    }
}

impl<T> Clone for WeakSignal<T> {
    fn clone(&self) -> WeakSignal<T> {
        WeakSignal { inner: self.inner.clone() }
    }
}

impl<T> fmt::Debug for WeakSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSignal").field("alive", &(self.inner.strong_count() > 0)).finish()
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Record every emission of this signal
    ///
    /// The returned spy stays connected until it is dropped.
    pub fn spy(&self) -> SignalSpy<T> {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let slot = self.connect(move |value: &T| sink.lock().unwrap().push(value.clone()));
        SignalSpy { records, signal: self.clone(), slot }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Signal<T> {
        Signal { inner: self.inner.clone() }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Signal<T> {
        Signal::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("slots", &self.slot_count()).finish()
    }
}

/// Records the values emitted by a [`Signal`]
pub struct SignalSpy<T> {
    records: Arc<Mutex<Vec<T>>>,
    signal: Signal<T>,
    slot: SlotId,
}

impl<T: Clone> SignalSpy<T> {
    /// Number of emissions recorded so far
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The most recent emission
    pub fn last(&self) -> Option<T> {
        self.records.lock().unwrap().last().cloned()
    }

    /// All recorded emissions, oldest first
    pub fn records(&self) -> Vec<T> {
        self.records.lock().unwrap().clone()
    }

    /// Take the recorded emissions, leaving the spy empty
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}

impl<T> Drop for SignalSpy<T> {
    fn drop(&mut self) {
        self.signal.disconnect(self.slot);
    }
}

impl<T> fmt::Debug for SignalSpy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSpy").field("slot", &self.slot).finish_non_exhaustive()
    }
}
