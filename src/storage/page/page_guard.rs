use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::{
    buffer::buffer_pool_manager::BufferPoolManager,
    storage::page::page::{PageId, SharedFrameHeader},
    utils::replacer::AccessType,
};

// Owns one unit of pin on a frame; dropping the guard gives the pin back.
// The dirty flag travels with the guard so the unpin carries writer intent.
pub struct PageGuard {
    bpm: Option<Arc<BufferPoolManager>>,
    frame: Option<SharedFrameHeader>,

    // Captured at construction: the unpin must target the page this guard
    // was issued for, whatever the frame holds by the time it drops.
    page_id: PageId,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, frame: SharedFrameHeader) -> Self {
        let page_id = frame.get_page_id();

        PageGuard {
            bpm: Some(bpm),
            frame: Some(frame),
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn frame(&self) -> &SharedFrameHeader {
        self.frame.as_ref().expect("guard has been released")
    }

    // Read latch held only for the duration of the returned guard.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame().data()
    }

    // Taking the mutable view is what commits this guard to a dirty unpin.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.is_dirty = true;
        self.frame.as_ref().expect("guard has been released").data_mut()
    }

    pub(crate) fn set_dirty(&mut self) {
        self.is_dirty = true;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let (Some(bpm), Some(_frame)) = (self.bpm.take(), self.frame.take()) {
            // The pool may refuse the unpin (the page can have been deleted
            // out from under the guard); that is absorbed here.
            bpm.unpin_page(self.page_id, self.is_dirty, AccessType::Unknown);
        }
    }
}

// Holds the frame's read latch for its whole lifetime. Field order matters:
// the latch is released before the wrapped guard gives the pin back.
pub struct ReadGuard {
    latch: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    guard: PageGuard,
}

impl ReadGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, frame: SharedFrameHeader) -> Self {
        let latch = frame.latch().read_arc();
        ReadGuard {
            latch,
            guard: PageGuard::new(bpm, frame),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.latch
    }
}

// Holds the frame's write latch for its whole lifetime; released as dirty
// even if no byte ends up touched.
pub struct WriteGuard {
    latch: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
    guard: PageGuard,
}

impl WriteGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, frame: SharedFrameHeader) -> Self {
        let latch = frame.latch().write_arc();
        let mut guard = PageGuard::new(bpm, frame);
        guard.set_dirty();

        WriteGuard { latch, guard }
    }

    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8] {
        &self.latch
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.latch
    }
}
