use crossbeam_utils::atomic::AtomicCell;

/// Single-value, latest-wins cell shared between the sensor and render threads.
///
/// Reads never block and never observe a partially written value. There is no
/// ordering between different slots: a reader may pair a fresh gravity sample
/// with an older magnetic one.
#[derive(Debug)]
pub struct SharedSlot<T: Copy> {
    cell: AtomicCell<Option<T>>,
}

impl<T: Copy> SharedSlot<T> {
    pub const fn new() -> Self {
        Self {
            cell: AtomicCell::new(None),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.cell.load()
    }

    pub fn set(&self, value: T) {
        self.cell.store(Some(value));
    }

    pub fn clear(&self) {
        self.cell.store(None);
    }

    /// Store `value` and return what was there before.
    pub fn replace(&self, value: Option<T>) -> Option<T> {
        self.cell.swap(value)
    }
}

impl<T: Copy> Default for SharedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
