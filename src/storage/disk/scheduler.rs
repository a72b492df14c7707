use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    task::{Context, Poll, Waker},
    thread::JoinHandle,
};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use super::manager::Manager;
use crate::storage::page::page::PageId;

// States of an in-flight I/O operation.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending = 0,    // Operation is still in progress
    Success = 1,    // Operation completed successfully
    WriteError = 2, // Write operation failed
    ReadError = 3,  // Read operation failed
}

impl IoStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoStatus::Success,
            2 => IoStatus::WriteError,
            3 => IoStatus::ReadError,
            _ => IoStatus::Pending,
        }
    }
}

// Completion handle for a scheduled request, resolving to true on success.
// Pool threads block on wait(); async callers can await it instead.
pub struct IoFuture {
    pub flag: Arc<AtomicU8>,
    pub signal: Arc<(Mutex<bool>, Condvar)>,
    pub waker: Arc<Mutex<Option<Waker>>>,
}

impl IoFuture {
    fn new() -> Self {
        IoFuture {
            flag: Arc::new(AtomicU8::new(IoStatus::Pending as u8)),
            signal: Arc::new((Mutex::new(false), Condvar::new())),
            waker: Arc::new(Mutex::new(None)),
        }
    }

    fn status(&self) -> IoStatus {
        IoStatus::from_u8(self.flag.load(Ordering::Acquire))
    }

    // Blocks the calling thread until the request completes.
    pub fn wait(&self) -> bool {
        let (done, condvar) = &*self.signal;
        let mut done_guard = done.lock();
        while !*done_guard {
            condvar.wait(&mut done_guard);
        }
        self.status() == IoStatus::Success
    }
}

impl Future for IoFuture {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        match self.status() {
            IoStatus::Pending => {
                {
                    let mut waker_guard = self.waker.lock();
                    *waker_guard = Some(cx.waker().clone());
                }

                // Re-check so a completion racing the waker install is not
                // lost.
                match self.status() {
                    IoStatus::Pending => Poll::Pending,
                    status => Poll::Ready(status == IoStatus::Success),
                }
            }

            status => Poll::Ready(status == IoStatus::Success),
        }
    }
}

// Write requests own their page image; read requests share the buffer the
// worker fills in.
pub enum DiskData {
    Write(Box<[u8]>),
    Read(Arc<Mutex<Box<[u8]>>>),
}

// A request to perform disk I/O.
pub struct DiskRequest {
    // Flag indicating whether the request is a write or a read.
    pub is_write: bool,

    // Data buffer for writes, or shared reference to buffer for reads.
    pub data: DiskData,

    // ID of the page being read from / written to disk.
    pub page_id: PageId,

    // Completion handles, cloned off the IoFuture the issuer holds.
    pub done_flag: Arc<AtomicU8>,
    pub signal: Arc<(Mutex<bool>, Condvar)>,
    pub waker: Arc<Mutex<Option<Waker>>>,
}

// Serializes disk I/O through a single background worker draining an
// unbounded FIFO queue. Dropping the scheduler enqueues a poison value and
// joins the worker.

pub struct DiskScheduler {
    manager: Arc<Mutex<Manager>>,
    request_queue: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(manager: Arc<Mutex<Manager>>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = Self::start_worker_queue(Arc::clone(&manager), rx);

        Self {
            manager,
            request_queue: tx,
            worker: Some(worker),
        }
    }

    fn start_worker_queue(
        manager: Arc<Mutex<Manager>>,
        rx: Receiver<Option<DiskRequest>>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            debug!("disk scheduler worker started");

            loop {
                let request = match rx.recv() {
                    Ok(Some(request)) => request,
                    // None is the shutdown poison; a closed channel means the
                    // scheduler itself is gone.
                    Ok(None) | Err(_) => break,
                };

                Self::service(&manager, request);
            }

            debug!("disk scheduler worker exiting");
        })
    }

    fn service(manager: &Arc<Mutex<Manager>>, request: DiskRequest) {
        let mut manager_guard = manager.lock();

        // A failed transfer resolves the future with an error status; the
        // worker itself must survive it.

        let status = if request.is_write {
            match &request.data {
                DiskData::Write(data) => match manager_guard.write_page(request.page_id, data) {
                    Ok(()) => IoStatus::Success,
                    Err(err) => {
                        error!("write of page {} failed: {err:#}", request.page_id);
                        IoStatus::WriteError
                    }
                },
                DiskData::Read(_) => {
                    error!("write request for page {} carries a read buffer", request.page_id);
                    IoStatus::WriteError
                }
            }
        } else {
            match &request.data {
                DiskData::Read(buffer) => {
                    let mut buffer_guard = buffer.lock();
                    match manager_guard.read_page(request.page_id, &mut buffer_guard[..]) {
                        Ok(()) => IoStatus::Success,
                        Err(err) => {
                            error!("read of page {} failed: {err:#}", request.page_id);
                            IoStatus::ReadError
                        }
                    }
                }
                DiskData::Write(_) => {
                    error!("read request for page {} carries a write buffer", request.page_id);
                    IoStatus::ReadError
                }
            }
        };

        drop(manager_guard);

        request.done_flag.store(status as u8, Ordering::Release);

        {
            let (done, condvar) = &*request.signal;
            let mut done_guard = done.lock();
            *done_guard = true;
            condvar.notify_all();
        }

        if let Some(waker) = request.waker.lock().take() {
            waker.wake();
        }
    }

    // Creates a future to track the status of a disk request.

    pub fn create_future(&self) -> IoFuture {
        IoFuture::new()
    }

    // Enqueues a request for the worker. Never blocks.

    pub fn schedule(&self, request: DiskRequest) {
        self.request_queue
            .send(Some(request))
            .expect("Failed to send disk request");
    }

    // Synchronous write on the caller's thread, bypassing the queue.

    pub fn flush_page(&self, page_id: PageId, page_data: &[u8]) -> bool {
        let mut manager_guard = self.manager.lock();
        match manager_guard.write_page(page_id, page_data) {
            Ok(()) => true,
            Err(err) => {
                error!("flush of page {page_id} failed: {err:#}");
                false
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::{DiskData, DiskRequest, DiskScheduler};
    use crate::storage::{disk::manager::Manager, page::page::page_constants::PAGE_SIZE};

    #[tokio::main]
    #[test]
    async fn scheduler_test() {
        let dir = tempdir().unwrap();
        let manager = Manager::new(&dir.path().join("scheduler_test.db")).unwrap();
        let manager = Arc::new(Mutex::new(manager));
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        let data = vec![1u8; PAGE_SIZE].into_boxed_slice();

        // Write Request
        let future_one = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(data.clone()),
            page_id: 0,
            done_flag: Arc::clone(&future_one.flag),
            signal: Arc::clone(&future_one.signal),
            waker: Arc::clone(&future_one.waker),
        });

        // Read Request
        let future_two = scheduler.create_future();
        let page_buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        scheduler.schedule(DiskRequest {
            is_write: false,
            data: DiskData::Read(Arc::clone(&page_buffer)),
            page_id: 0,
            done_flag: Arc::clone(&future_two.flag),
            signal: Arc::clone(&future_two.signal),
            waker: Arc::clone(&future_two.waker),
        });

        assert!(future_one.await);
        assert!(future_two.await);

        // Verify Read & Write
        let read_data = page_buffer.lock();
        assert_eq!(&**read_data, &*data, "page read mismatch");
    }

    #[test]
    fn requests_complete_in_fifo_order() {
        let dir = tempdir().unwrap();
        let manager = Manager::new(&dir.path().join("fifo.db")).unwrap();
        let manager = Arc::new(Mutex::new(manager));
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        let write_future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(vec![9u8; PAGE_SIZE].into_boxed_slice()),
            page_id: 2,
            done_flag: Arc::clone(&write_future.flag),
            signal: Arc::clone(&write_future.signal),
            waker: Arc::clone(&write_future.waker),
        });

        // Scheduled after the write, so it must observe the write's bytes.
        let read_future = scheduler.create_future();
        let page_buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        scheduler.schedule(DiskRequest {
            is_write: false,
            data: DiskData::Read(Arc::clone(&page_buffer)),
            page_id: 2,
            done_flag: Arc::clone(&read_future.flag),
            signal: Arc::clone(&read_future.signal),
            waker: Arc::clone(&read_future.waker),
        });

        assert!(read_future.wait());
        assert!(write_future.wait());
        assert!(page_buffer.lock().iter().all(|&byte| byte == 9));
    }

    #[test]
    fn failed_request_resolves_false() {
        let dir = tempdir().unwrap();
        let manager = Manager::new(&dir.path().join("failed.db")).unwrap();
        let manager = Arc::new(Mutex::new(manager));
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        // An invalid page id makes the manager reject the write; the worker
        // must resolve the future with false and keep running.
        let bad_future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            page_id: -1,
            done_flag: Arc::clone(&bad_future.flag),
            signal: Arc::clone(&bad_future.signal),
            waker: Arc::clone(&bad_future.waker),
        });
        assert!(!bad_future.wait());

        let good_future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            page_id: 0,
            done_flag: Arc::clone(&good_future.flag),
            signal: Arc::clone(&good_future.signal),
            waker: Arc::clone(&good_future.waker),
        });
        assert!(good_future.wait());
    }

    #[test]
    fn shutdown_drains_the_queue() {
        let dir = tempdir().unwrap();
        let manager = Manager::new(&dir.path().join("shutdown.db")).unwrap();
        let manager = Arc::new(Mutex::new(manager));
        let scheduler = DiskScheduler::new(Arc::clone(&manager));

        let future = scheduler.create_future();
        scheduler.schedule(DiskRequest {
            is_write: true,
            data: DiskData::Write(vec![5u8; PAGE_SIZE].into_boxed_slice()),
            page_id: 1,
            done_flag: Arc::clone(&future.flag),
            signal: Arc::clone(&future.signal),
            waker: Arc::clone(&future.waker),
        });

        // Drop joins the worker, which services everything ahead of the
        // poison first.
        drop(scheduler);

        assert!(future.wait());
        let mut page_buffer = [0u8; PAGE_SIZE];
        manager.lock().read_page(1, &mut page_buffer).unwrap();
        assert!(page_buffer.iter().all(|&byte| byte == 5));
    }
}
