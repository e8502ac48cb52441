//! 映射所需的文件接口，以及被多页共享的重开文件句柄

use alloc::boxed::Box;

use defines::{
    config::PAGE_SIZE,
    error::{errno, KResult},
};
use triomphe::Arc;

use crate::{address::VirtPageNum, frame_allocator::PageBytes};

/// 文件系统提供的文件句柄。drop 即关闭
pub trait VmFile: Send + Sync {
    /// 从 `offset` 开始读，返回实际读到的字节数
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;
    /// 从 `offset` 开始写，返回实际写入的字节数
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;
    fn len(&self) -> usize;
    /// 打开同一个文件的另一个独立句柄
    fn reopen(&self) -> KResult<Box<dyn VmFile>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一次映射（mmap 或可执行段）重开的文件。
///
/// 映射中每一页持有一个引用，fork 出的子进程也共享同一个，最后一页销毁时句柄随之关闭
pub struct BackingFile {
    file: Box<dyn VmFile>,
    base: VirtPageNum,
    page_count: usize,
}

pub type SharedFile = Arc<BackingFile>;

impl BackingFile {
    /// 重开 `file`，作为从 `base` 开始 `page_count` 页的映射的后备
    pub fn reopen(file: &dyn VmFile, base: VirtPageNum, page_count: usize) -> KResult<SharedFile> {
        Ok(Arc::new(Self {
            file: file.reopen()?,
            base,
            page_count,
        }))
    }

    pub fn base(&self) -> VirtPageNum {
        self.base
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn len(&self) -> usize {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }
}

/// 页在文件中对应的那一段
#[derive(Clone)]
pub struct FileSegment {
    pub file: SharedFile,
    pub offset: usize,
    /// 该页从文件读入的字节数，其余补零
    pub read_bytes: usize,
}

impl FileSegment {
    pub fn new(file: SharedFile, offset: usize, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);
        Self {
            file,
            offset,
            read_bytes,
        }
    }

    /// 读入一整页，文件中不足的部分补零。读短了返回 `EIO`
    pub fn load(&self, page: &mut PageBytes) -> KResult<()> {
        let (data, rest) = page.split_at_mut(self.read_bytes);
        if self.file.file.read_at(data, self.offset) != self.read_bytes {
            warn!(
                "short read at offset {:#x}, expect {} bytes",
                self.offset, self.read_bytes
            );
            return Err(errno::EIO);
        }
        rest.fill(0);
        Ok(())
    }

    /// 把页内容写回文件，只写属于文件的那部分
    pub fn write_back(&self, page: &PageBytes) {
        let written = self
            .file
            .file
            .write_at(&page[..self.read_bytes], self.offset);
        if written != self.read_bytes {
            error!(
                "write back {written}/{} bytes at offset {:#x}",
                self.read_bytes, self.offset
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemFile;

    #[test]
    fn load_pads_with_zero() {
        let file = MemFile::new(b"hello".to_vec());
        let shared = BackingFile::reopen(&file, VirtPageNum(0x100), 1).unwrap();
        let seg = FileSegment::new(Arc::clone(&shared), 1, 4);
        let mut page = [0xffu8; PAGE_SIZE];
        seg.load(&mut page).unwrap();
        assert_eq!(&page[..4], b"ello");
        assert!(page[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_read_is_io_error() {
        let file = MemFile::new(b"abc".to_vec());
        let shared = BackingFile::reopen(&file, VirtPageNum(0x100), 1).unwrap();
        let seg = FileSegment::new(shared, 0, 16);
        let mut page = [0u8; PAGE_SIZE];
        assert_eq!(seg.load(&mut page), Err(errno::EIO));
    }

    #[test]
    fn closes_with_last_reference() {
        let file = MemFile::new(vec![1; 10]);
        let shared = BackingFile::reopen(&file, VirtPageNum(0x100), 2).unwrap();
        assert_eq!(file.open_handles(), 2);
        let other = Arc::clone(&shared);
        drop(shared);
        assert_eq!(file.open_handles(), 2);
        drop(other);
        assert_eq!(file.open_handles(), 1);
    }
}
