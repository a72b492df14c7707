use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
};

use log::{debug, error};
use parking_lot::Mutex;

use crate::{
    storage::{
        disk::{
            manager::Manager,
            scheduler::{DiskData, DiskRequest, DiskScheduler},
        },
        page::{
            page::{
                page_constants::{INVALID_PAGE_ID, PAGE_SIZE},
                FrameHeader, FrameId, PageId, SharedFrameHeader,
            },
            page_guard::{PageGuard, ReadGuard, WriteGuard},
        },
    },
    utils::replacer::{AccessType, LRUKReplacer, Replacer},
};

// Bookkeeping the pool latch protects. Holding this mutex *is* holding the
// pool latch; it stays held for the whole of every public operation,
// including any disk wait the operation performs.
struct PoolInner {
    // Maps every resident page to its frame.
    page_table: HashMap<PageId, FrameId>,

    // Frames holding no resident page.
    free_frames: VecDeque<FrameId>,
}

pub struct BufferPoolManager {
    num_frames: usize,
    next_page_id: AtomicI32,

    // The frame headers of the frames that this buffer pool manages.
    frames: Vec<SharedFrameHeader>,

    inner: Mutex<PoolInner>,

    // The replacer to find unpinned / candidate frames for eviction. Lock
    // order is always pool latch first, replacer latch second.
    replacer: Mutex<LRUKReplacer>,

    // Serializes reads and write-backs against the backing store.
    disk_scheduler: Mutex<DiskScheduler>,

    pub manager: Arc<Mutex<Manager>>,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, manager: Manager, k_dist: usize) -> Arc<Self> {
        let manager = Arc::new(Mutex::new(manager));

        let mut frames: Vec<SharedFrameHeader> = Vec::with_capacity(num_frames);
        let mut free_frames: VecDeque<FrameId> = VecDeque::with_capacity(num_frames);

        // Every frame starts out in the free list.
        for i in 0..num_frames {
            frames.push(Arc::new(FrameHeader::new(i as FrameId)));
            free_frames.push_back(i as FrameId);
        }

        Arc::new(Self {
            num_frames,
            next_page_id: AtomicI32::new(0),
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_frames,
            }),
            replacer: Mutex::new(LRUKReplacer::new(num_frames, k_dist)),
            disk_scheduler: Mutex::new(DiskScheduler::new(Arc::clone(&manager))),
            manager,
        })
    }

    pub fn get_pool_size(&self) -> usize {
        self.num_frames
    }

    pub fn get_pages(&self) -> &[SharedFrameHeader] {
        &self.frames
    }

    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        let frame_id = *inner.page_table.get(&page_id)?;
        Some(self.frames[frame_id as usize].get_pin_count())
    }

    // Allocates a fresh page identifier. Ids are never reused.
    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_page(&self) -> Option<(PageId, SharedFrameHeader)> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = self.allocate_page();
        let frame = &self.frames[frame_id as usize];

        inner.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id, AccessType::Unknown);
            replacer.set_evictable(frame_id, false);
        }

        debug!("new page {page_id} resident in frame {frame_id}");
        Some((page_id, Arc::clone(frame)))
    }

    pub fn fetch_page(
        &self,
        page_id: PageId,
        access_type: AccessType,
    ) -> Option<SharedFrameHeader> {
        if page_id == INVALID_PAGE_ID {
            return None;
        }

        let mut inner = self.inner.lock();

        // Page already in memory, no additional I/O.
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            frame.pin();

            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id, access_type);
            replacer.set_evictable(frame_id, false);

            return Some(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id as usize];

        inner.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        {
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id, access_type);
            replacer.set_evictable(frame_id, false);
        }

        // Pin first, then read: the frame cannot be reclaimed while the
        // transfer is in flight.
        if !self.read_in(frame) {
            error!("read of page {page_id} failed, rolling back the fetch");
            inner.page_table.remove(&page_id);
            frame.unpin();
            frame.set_page_id(INVALID_PAGE_ID);
            self.replacer.lock().remove(frame_id);
            inner.free_frames.push_back(frame_id);
            return None;
        }

        Some(Arc::clone(frame))
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool, _access_type: AccessType) -> bool {
        let inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(frame_id) => *frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id as usize];

        if frame.get_pin_count() == 0 {
            return false;
        }

        // The dirty flag only ever accumulates here; write-back clears it.
        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }

        true
    }

    pub fn flush_page(&self, page_id: PageId) -> bool {
        let inner = self.inner.lock();
        self.flush_page_locked(&inner, page_id)
    }

    pub fn flush_all_pages(&self) {
        let inner = self.inner.lock();

        let resident: Vec<PageId> = inner.page_table.keys().copied().collect();
        for page_id in resident {
            self.flush_page_locked(&inner, page_id);
        }
    }

    fn flush_page_locked(&self, inner: &PoolInner, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }

        let frame_id = match inner.page_table.get(&page_id) {
            Some(frame_id) => *frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id as usize];

        let flushed = {
            let data = frame.data();
            self.disk_scheduler.lock().flush_page(page_id, &data[..])
        };

        if flushed {
            frame.set_dirty(false);
        }
        flushed
    }

    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(frame_id) => *frame_id,
            None => return true,
        };
        let frame = &self.frames[frame_id as usize];

        if frame.get_pin_count() > 0 {
            return false;
        }

        inner.page_table.remove(&page_id);
        frame.reset_memory();
        frame.set_dirty(false);
        frame.set_page_id(INVALID_PAGE_ID);

        self.replacer.lock().remove(frame_id);
        inner.free_frames.push_back(frame_id);

        debug!("deleted page {page_id}, frame {frame_id} returned to the free list");
        true
    }

    pub fn new_page_guarded(self: &Arc<Self>) -> Option<PageGuard> {
        let (_, frame) = self.new_page()?;
        Some(PageGuard::new(Arc::clone(self), frame))
    }

    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Option<PageGuard> {
        let frame = self.fetch_page(page_id, AccessType::Unknown)?;
        Some(PageGuard::new(Arc::clone(self), frame))
    }

    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Option<ReadGuard> {
        let frame = self.fetch_page(page_id, AccessType::Lookup)?;
        Some(ReadGuard::new(Arc::clone(self), frame))
    }

    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Option<WriteGuard> {
        let frame = self.fetch_page(page_id, AccessType::Lookup)?;
        Some(WriteGuard::new(Arc::clone(self), frame))
    }

    // Frees up a frame for a new resident: free list first, eviction second.
    // Runs entirely under the pool latch, write-back included, so no
    // concurrent operation can touch the chosen frame mid-transfer.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Option<FrameId> {
        if let Some(frame_id) = inner.free_frames.pop_front() {
            return Some(frame_id);
        }

        let frame_id = self.replacer.lock().evict()?;
        let frame = &self.frames[frame_id as usize];
        let old_page_id = frame.get_page_id();

        if frame.is_dirty() {
            debug!("evicting dirty page {old_page_id} from frame {frame_id}");

            if !self.write_back(frame) {
                // The on-disk image is stale and the in-memory one must not
                // be lost: put the victim back and report exhaustion.
                error!("write-back of page {old_page_id} failed, aborting the eviction");
                let mut replacer = self.replacer.lock();
                replacer.record_access(frame_id, AccessType::Unknown);
                replacer.set_evictable(frame_id, true);
                return None;
            }

            frame.set_dirty(false);
        }

        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        frame.reset_memory();
        frame.set_page_id(INVALID_PAGE_ID);

        Some(frame_id)
    }

    // Schedules a write of the frame's current image and blocks on its
    // completion.
    fn write_back(&self, frame: &FrameHeader) -> bool {
        let image: Box<[u8]> = {
            let data = frame.data();
            (*data).clone()
        };

        let scheduler = self.disk_scheduler.lock();
        let future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(image),
            page_id: frame.get_page_id(),
            done_flag: Arc::clone(&future.flag),
            signal: Arc::clone(&future.signal),
            waker: Arc::clone(&future.waker),
        });
        drop(scheduler);

        future.wait()
    }

    // Schedules a read of the frame's resident page and blocks on its
    // completion before copying the image into the frame.
    fn read_in(&self, frame: &FrameHeader) -> bool {
        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));

        let scheduler = self.disk_scheduler.lock();
        let future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: false,
            data: DiskData::Read(Arc::clone(&buffer)),
            page_id: frame.get_page_id(),
            done_flag: Arc::clone(&future.flag),
            signal: Arc::clone(&future.signal),
            waker: Arc::clone(&future.waker),
        });
        drop(scheduler);

        if !future.wait() {
            return false;
        }

        frame.data_mut().copy_from_slice(&buffer.lock()[..]);
        true
    }
}
