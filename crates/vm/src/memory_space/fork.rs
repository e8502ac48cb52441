use defines::error::{errno, KResult};
use scopeguard::ScopeGuard;

use super::MemorySpace;
use crate::page::{Page, PageRef};

impl MemorySpace {
    /// 为 fork 复制一个地址空间。
    ///
    /// 匿名页立刻分配物理页并复制内容；文件页与父进程共享同一个重开的文件句柄
    pub fn from_other(user_space: &Self) -> KResult<Self> {
        let mut memory_space = Self::new(user_space.vm.clone());
        memory_space.user_sp = user_space.user_sp;
        memory_space.copy_from(user_space)?;
        Ok(memory_space)
    }

    /// 把 `src` 的所有页复制到本地址空间。
    ///
    /// 失败时已经复制的页仍留在本地址空间中，由调用者丢弃整个地址空间
    pub fn copy_from(&mut self, src: &Self) -> KResult<()> {
        debug!("copy {} pages for fork", src.spt.len());
        for page in src.spt.iter().map(|(_, page)| page) {
            self.copy_page(page)?;
        }
        Ok(())
    }

    fn copy_page(&mut self, src: &PageRef) -> KResult<()> {
        let lazy = {
            let src = src.lock();
            if self.spt.contains(src.vpn()) {
                return Err(errno::EEXIST);
            }
            src.lazy_load()
                .map(|(init, target)| Page::new_uninit(src.vpn(), src.writable(), init, target))
        };
        if let Some(page) = lazy {
            return self.spt.insert(page?.into_ref());
        }

        // 先拿物理页再锁源页，驱逐可能会锁住源页
        let ppn = scopeguard::guard(self.vm.acquire_frame(), |ppn| {
            self.vm.pool.free_page(ppn);
        });
        let mut page = {
            let src = src.lock();
            src.copy_into(&self.vm, *ppn)?;
            match src.file_segment() {
                Some(segment) => Page::new_file(src.vpn(), src.writable(), segment.clone()),
                None => Page::new_anon(src.vpn(), src.writable()),
            }
        };
        let ppn = ScopeGuard::into_inner(ppn);
        page.set_frame(ppn);
        let (vpn, writable) = (page.vpn(), page.writable());
        let page = page.into_ref();
        self.page_table.lock().map(vpn, ppn, writable);
        self.vm.register_frame(ppn, &page, &self.page_table);
        self.spt.insert(page)
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use defines::config::PAGE_SIZE;

    use super::*;
    use crate::{
        address::VirtAddr,
        page::{LazyLoad, PageType},
        test_utils::{init_logger, MemDisk, MemFile},
        VmContext,
    };

    const BASE: usize = 0x1000_0000;

    fn space(pool_pages: usize) -> MemorySpace {
        init_logger();
        MemorySpace::new(VmContext::new(pool_pages, Box::new(MemDisk::with_slots(8))))
    }

    fn anon_page(space: &mut MemorySpace, va: VirtAddr) {
        space
            .alloc_page(va, true, LazyLoad::Zero, PageType::Anon)
            .unwrap();
    }

    #[test]
    fn child_writes_are_private() {
        let mut parent = space(8);
        let va = VirtAddr(BASE);
        anon_page(&mut parent, va);
        parent.write_user(va, b"parent").unwrap();

        let mut child = MemorySpace::from_other(&parent).unwrap();
        assert_ne!(child.translate(va), parent.translate(va));
        child.write_user(va, b"child!").unwrap();

        let mut buf = [0; 6];
        parent.read_user(va, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
        child.read_user(va, &mut buf).unwrap();
        assert_eq!(&buf, b"child!");
    }

    #[test]
    fn swapped_out_page_is_copied() {
        let mut parent = space(2);
        for i in 0..3 {
            let va = VirtAddr(BASE + i * PAGE_SIZE);
            anon_page(&mut parent, va);
            parent.write_user(va, &[i as u8 + 1; 4]).unwrap();
        }
        assert_eq!(parent.vm().stats().swap_slots_in_use, 1);

        let mut child = MemorySpace::from_other(&parent).unwrap();
        for i in 0..3 {
            let mut buf = [0; 4];
            child
                .read_user(VirtAddr(BASE + i * PAGE_SIZE), &mut buf)
                .unwrap();
            assert_eq!(buf, [i as u8 + 1; 4]);
        }
        drop(child);
        for i in 0..3 {
            let mut buf = [0; 4];
            parent
                .read_user(VirtAddr(BASE + i * PAGE_SIZE), &mut buf)
                .unwrap();
            assert_eq!(buf, [i as u8 + 1; 4]);
        }
    }

    #[test]
    fn lazy_page_stays_lazy() {
        let mut parent = space(4);
        let va = VirtAddr(BASE);
        anon_page(&mut parent, va);
        let child = MemorySpace::from_other(&parent).unwrap();
        assert_eq!(child.translate(va), None);
        assert_eq!(child.page_type(va), Some(PageType::Anon));
        assert_eq!(child.user_sp(), parent.user_sp());
    }

    #[test]
    fn mapped_file_closes_after_both_processes() {
        let mut parent = space(4);
        let file = MemFile::new(vec![9; 2 * PAGE_SIZE]);
        let addr = parent
            .try_map_file(VirtAddr(BASE), 2 * PAGE_SIZE, true, &file, 0)
            .unwrap();
        // 一页驻留，一页仍未加载
        parent.write_user(addr, b"x").unwrap();
        assert_eq!(file.open_handles(), 2);

        let mut child = MemorySpace::from_other(&parent).unwrap();
        let mut sibling = MemorySpace::from_other(&parent).unwrap();
        assert_eq!(file.open_handles(), 2);
        let mut buf = [0; 2];
        child.read_user(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"x\x09");

        parent.unmap(addr).unwrap();
        assert_eq!(file.open_handles(), 2);
        drop(parent);
        sibling.recycle_user_pages();
        assert_eq!(file.open_handles(), 2);
        child.unmap(addr + PAGE_SIZE).unwrap();
        assert_eq!(file.open_handles(), 1);
    }
}
