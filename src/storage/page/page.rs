use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
    Arc,
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod page_constants {
    pub const PAGE_SIZE: usize = 4096;
    pub const INVALID_PAGE_ID: super::PageId = -1;
}

pub type PageId = i32;
pub type FrameId = u32;

use page_constants::{INVALID_PAGE_ID, PAGE_SIZE};

// One slot of the buffer pool. The byte buffer sits behind the frame's
// reader/writer latch; the metadata fields are atomics so inspectors can
// read them without it. All metadata transitions happen under the pool
// latch.
pub struct FrameHeader {
    frame_id: FrameId,
    page_id: AtomicI32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,

    data: Arc<RwLock<Box<[u8]>>>,
}

pub type SharedFrameHeader = Arc<FrameHeader>;

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        FrameHeader {
            frame_id,
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
        }
    }

    pub fn get_frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn get_pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    // Takes the frame's read latch for the lifetime of the returned guard.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    // Takes the frame's write latch for the lifetime of the returned guard.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    pub(crate) fn latch(&self) -> &Arc<RwLock<Box<[u8]>>> {
        &self.data
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub(crate) fn set_dirty(&self, is_dirty: bool) {
        self.is_dirty.store(is_dirty, Ordering::Release);
    }

    // Returns the new pin count.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    // Returns the new pin count. The caller checks for zero first.
    pub(crate) fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn reset_memory(&self) {
        self.data.write().fill(0);
    }
}
