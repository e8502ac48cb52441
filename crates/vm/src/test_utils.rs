//! 测试用的内存盘、内存文件与文件描述符表

use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use std::collections::BTreeMap;

use defines::{
    config::{SECTORS_PER_PAGE, SECTOR_SIZE},
    error::KResult,
};
use klocks::SpinMutex;
use log::LevelFilter;
use triomphe::Arc;

use crate::{file::VmFile, swap::BlockDevice, syscall::FileTable};

pub fn init_logger() {
    fn sink(args: fmt::Arguments<'_>) {
        eprint!("{args}");
    }
    simple_logger::init_with_level(sink, LevelFilter::Debug);
}

pub struct MemDisk {
    sectors: SpinMutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDisk {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: SpinMutex::new(vec![[0; SECTOR_SIZE]; sector_count]),
        }
    }

    /// 恰好能放下 `slots` 个交换槽
    pub fn with_slots(slots: usize) -> Self {
        Self::new(slots * SECTORS_PER_PAGE)
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]) {
        buf.copy_from_slice(&self.sectors.lock()[sector]);
    }

    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]) {
        self.sectors.lock()[sector].copy_from_slice(buf);
    }

    fn sector_count(&self) -> usize {
        self.sectors.lock().len()
    }
}

struct Inode {
    data: SpinMutex<Vec<u8>>,
    open_handles: AtomicUsize,
}

/// 内存中的文件。每个 `MemFile` 是一个打开的句柄，drop 即关闭
pub struct MemFile {
    inode: Arc<Inode>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inode: Arc::new(Inode {
                data: SpinMutex::new(data),
                open_handles: AtomicUsize::new(1),
            }),
        }
    }

    /// 再打开一个句柄
    pub fn open(&self) -> Self {
        self.inode.open_handles.fetch_add(1, Ordering::SeqCst);
        Self {
            inode: Arc::clone(&self.inode),
        }
    }

    /// 同一文件当前打开的句柄数，包括自己
    pub fn open_handles(&self) -> usize {
        self.inode.open_handles.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inode.data.lock().clone()
    }

    pub fn truncate(&self, len: usize) {
        self.inode.data.lock().truncate(len);
    }
}

impl VmFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.inode.data.lock();
        let Some(rest) = data.get(offset..) else {
            return 0;
        };
        let len = buf.len().min(rest.len());
        buf[..len].copy_from_slice(&rest[..len]);
        len
    }

    /// 不会扩展文件
    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.inode.data.lock();
        let Some(rest) = data.get_mut(offset..) else {
            return 0;
        };
        let len = buf.len().min(rest.len());
        rest[..len].copy_from_slice(&buf[..len]);
        len
    }

    fn len(&self) -> usize {
        self.inode.data.lock().len()
    }

    fn reopen(&self) -> KResult<Box<dyn VmFile>> {
        Ok(Box::new(self.open()))
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.inode.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFdTable {
    files: BTreeMap<usize, MemFile>,
}

impl FakeFdTable {
    pub fn insert(&mut self, fd: usize, file: MemFile) {
        self.files.insert(fd, file);
    }
}

impl FileTable for FakeFdTable {
    fn get(&self, fd: usize) -> Option<&dyn VmFile> {
        self.files.get(&fd).map(|file| file as &dyn VmFile)
    }
}
