use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use hashlink::LinkedHashMap;
use log::warn;

use crate::storage::page::page::{page_constants::PAGE_SIZE, PageId};

// Synchronous single-file block store. Not thread-safe; the disk scheduler
// is its only I/O user (behind a mutex the scheduler worker and the
// synchronous flush path share).
pub struct Manager {
    db_io: File,
    db_file_path: PathBuf,

    // Offsets of every page written so far, in allocation order. A page
    // missing from here was never written back and reads as zeroes.
    page_offsets: LinkedHashMap<PageId, u64>,

    num_writes: u32,
    num_flushes: u32,
}

impl Manager {
    pub fn new(db_file_path: &Path) -> anyhow::Result<Self> {
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_file_path)
            .with_context(|| format!("failed to open db file {}", db_file_path.display()))?;

        Ok(Manager {
            db_io,
            db_file_path: db_file_path.to_path_buf(),
            page_offsets: LinkedHashMap::new(),
            num_writes: 0,
            num_flushes: 0,
        })
    }

    pub fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(page_id >= 0, "cannot write invalid page id {page_id}");
        anyhow::ensure!(
            page_data.len() == PAGE_SIZE,
            "page image is {} bytes, expected {PAGE_SIZE}",
            page_data.len()
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;

        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {page_id}"))?;
        self.db_io
            .write_all(page_data)
            .with_context(|| format!("I/O error while writing page {page_id}"))?;
        self.db_io
            .flush()
            .with_context(|| format!("error flushing page {page_id}"))?;

        self.page_offsets.insert(page_id, offset);
        self.num_writes += 1;
        self.num_flushes += 1;

        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> anyhow::Result<()> {
        anyhow::ensure!(page_id >= 0, "cannot read invalid page id {page_id}");
        anyhow::ensure!(
            page_data.len() == PAGE_SIZE,
            "page buffer is {} bytes, expected {PAGE_SIZE}",
            page_data.len()
        );

        let offset = match self.page_offsets.get(&page_id) {
            Some(offset) => *offset,
            None => {
                // Allocated but never written back: the on-disk image is all
                // zeroes by definition.
                page_data.fill(0);
                return Ok(());
            }
        };

        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {page_id}"))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = self
                .db_io
                .read(&mut page_data[filled..])
                .with_context(|| format!("I/O error while reading page {page_id}"))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled < PAGE_SIZE {
            warn!(
                "short read of page {page_id}, zero-filling {} bytes",
                PAGE_SIZE - filled
            );
            page_data[filled..].fill(0);
        }

        Ok(())
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes
    }

    pub fn num_flushes(&self) -> u32 {
        self.num_flushes
    }

    pub fn db_file_path(&self) -> &Path {
        &self.db_file_path
    }
}

#[cfg(test)]
pub mod test {
    use tempfile::tempdir;

    use super::Manager;
    use crate::storage::page::page::page_constants::PAGE_SIZE;

    #[test]
    fn db_io_test() {
        let dir = tempdir().unwrap();
        let mut manager = Manager::new(&dir.path().join("db_io_test.db")).unwrap();

        let data = [1u8; PAGE_SIZE];
        let mut page_buffer = [0u8; PAGE_SIZE];

        manager.write_page(3, &data).unwrap();
        manager.read_page(3, &mut page_buffer).unwrap();

        assert_eq!(data, page_buffer, "page read mismatch");
        assert_eq!(1, manager.num_writes());
    }

    #[test]
    fn unwritten_page_reads_as_zeroes() {
        let dir = tempdir().unwrap();
        let mut manager = Manager::new(&dir.path().join("zeroes.db")).unwrap();

        let mut page_buffer = [7u8; PAGE_SIZE];
        manager.read_page(0, &mut page_buffer).unwrap();

        assert!(page_buffer.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn invalid_page_id_is_rejected() {
        let dir = tempdir().unwrap();
        let mut manager = Manager::new(&dir.path().join("invalid.db")).unwrap();

        let data = [0u8; PAGE_SIZE];
        assert!(manager.write_page(-1, &data).is_err());

        let mut page_buffer = [0u8; PAGE_SIZE];
        assert!(manager.read_page(-1, &mut page_buffer).is_err());
    }
}
