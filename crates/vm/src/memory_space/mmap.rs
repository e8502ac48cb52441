use alloc::vec::Vec;

use defines::{
    config::{PAGE_OFFSET_MASK, PAGE_SIZE, USER_END},
    error::{errno, KResult},
};
use smallvec::SmallVec;
use triomphe::Arc;

use super::MemorySpace;
use crate::{
    address::{VirtAddr, VirtPageNum},
    file::{BackingFile, FileSegment, VmFile},
    page::{LazyLoad, Page, PageRef, PageType},
};

impl MemorySpace {
    /// 把 `file` 从 `offset` 开始的 `len` 字节惰性映射到 `addr`，返回映射的起始地址。
    ///
    /// 范围内只要有一页已被占用，就什么都不创建
    pub fn try_map_file(
        &mut self,
        addr: VirtAddr,
        len: usize,
        writable: bool,
        file: &dyn VmFile,
        offset: usize,
    ) -> KResult<VirtAddr> {
        if addr.0 == 0 || !addr.is_page_aligned() || len == 0 || offset & PAGE_OFFSET_MASK != 0 {
            return Err(errno::EINVAL);
        }
        if addr.0.checked_add(len).map_or(true, |end| end > USER_END) {
            return Err(errno::EINVAL);
        }
        if file.is_empty() {
            return Err(errno::EINVAL);
        }
        let base = addr.vpn_floor();
        let page_count = len.div_ceil(PAGE_SIZE);
        if offset.checked_add(page_count * PAGE_SIZE).is_none() {
            return Err(errno::EINVAL);
        }
        self.ensure_unoccupied(base, page_count)?;

        let file = BackingFile::reopen(file, base, page_count)?;
        let mapped_len = len.min(file.len().saturating_sub(offset));
        let pages = (0..page_count)
            .map(|i| {
                let read_bytes = mapped_len.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
                let segment = FileSegment::new(file.clone(), offset + i * PAGE_SIZE, read_bytes);
                Page::new_uninit(base + i, writable, LazyLoad::File(segment), PageType::File)
                    .map(Page::into_ref)
            })
            .collect::<KResult<Vec<_>>>()?;
        self.insert_run(pages)?;
        debug!("mmap {addr:?}, {page_count} pages, offset {offset:#x}");
        Ok(addr)
    }

    /// 解除 `addr` 所在的整个文件映射，脏页写回文件
    pub fn unmap(&mut self, addr: VirtAddr) -> KResult<()> {
        let file = self
            .spt
            .find(addr.vpn_floor())
            .and_then(|page| page.lock().mapped_file().cloned())
            .ok_or(errno::EINVAL)?;
        let to_unmap = (0..file.page_count())
            .map(|i| file.base() + i)
            .filter(|&vpn| {
                self.spt.find(vpn).is_some_and(|page| {
                    page.lock()
                        .mapped_file()
                        .is_some_and(|mapped| Arc::ptr_eq(mapped, &file))
                })
            })
            .collect::<SmallVec<[VirtPageNum; 8]>>();
        debug!("munmap {:?}, {} pages", file.base(), to_unmap.len());
        drop(file);
        for vpn in to_unmap {
            self.remove_page(vpn.page_start())?;
        }
        Ok(())
    }

    /// 惰性加载可执行文件的一个段。
    ///
    /// 从 `offset` 读 `read_bytes` 字节到 `upage`，随后 `zero_bytes` 字节清零，两者之和须是页大小的整数倍。
    /// 这些页初始化后都是匿名页
    pub fn load_segment(
        &mut self,
        file: &dyn VmFile,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> KResult<()> {
        let total = read_bytes.checked_add(zero_bytes).ok_or(errno::EINVAL)?;
        if !upage.is_page_aligned() || offset & PAGE_OFFSET_MASK != 0 || total % PAGE_SIZE != 0 {
            return Err(errno::EINVAL);
        }
        if upage.0.checked_add(total).map_or(true, |end| end > USER_END) {
            return Err(errno::EINVAL);
        }
        if offset.checked_add(total).is_none() {
            return Err(errno::EINVAL);
        }
        let base = upage.vpn_floor();
        let page_count = total / PAGE_SIZE;
        self.ensure_unoccupied(base, page_count)?;

        let file = if read_bytes > 0 {
            Some(BackingFile::reopen(file, base, page_count)?)
        } else {
            None
        };
        let pages = (0..page_count)
            .map(|i| {
                let page_read_bytes = read_bytes.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
                let init = match &file {
                    Some(file) if page_read_bytes > 0 => LazyLoad::File(FileSegment::new(
                        file.clone(),
                        offset + i * PAGE_SIZE,
                        page_read_bytes,
                    )),
                    _ => LazyLoad::Zero,
                };
                Page::new_uninit(base + i, writable, init, PageType::Anon).map(Page::into_ref)
            })
            .collect::<KResult<Vec<_>>>()?;
        self.insert_run(pages)
    }

    fn ensure_unoccupied(&self, base: VirtPageNum, page_count: usize) -> KResult<()> {
        if (0..page_count).any(|i| self.spt.contains(base + i)) {
            return Err(errno::EEXIST);
        }
        Ok(())
    }

    /// 插入一串新页。中途失败时已插入的页全部撤回
    fn insert_run(&mut self, pages: Vec<PageRef>) -> KResult<()> {
        let mut inserted = SmallVec::<[VirtPageNum; 8]>::new();
        for page in pages {
            let vpn = page.lock().vpn();
            if let Err(err) = self.spt.insert(page) {
                for vpn in inserted {
                    self.spt.remove(vpn);
                }
                return Err(err);
            }
            inserted.push(vpn);
        }
        Ok(())
    }
}
