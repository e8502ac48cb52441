//! 帧表：记录每个被用户页占用的物理页，页池耗尽时用时钟算法挑选驱逐对象

use alloc::vec::Vec;

use defines::error::KResult;
use scopeguard::ScopeGuard;

use crate::{
    address::{PhysPageNum, VirtPageNum},
    page::PageRef,
    page_table::PageTableHandle,
    VmContext,
};

struct FrameEntry {
    ppn: PhysPageNum,
    vpn: VirtPageNum,
    page: PageRef,
    page_table: PageTableHandle,
}

pub struct FrameTable {
    entries: Vec<FrameEntry>,
    /// 时钟指针，跨多次驱逐保留
    hand: usize,
    evictions: usize,
}

impl FrameTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            hand: 0,
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> usize {
        self.evictions
    }

    fn push(&mut self, ppn: PhysPageNum, vpn: VirtPageNum, page: PageRef, page_table: PageTableHandle) {
        self.entries.push(FrameEntry {
            ppn,
            vpn,
            page,
            page_table,
        });
    }

    fn remove_at(&mut self, index: usize) -> FrameEntry {
        let entry = self.entries.remove(index);
        if index < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.entries.len() {
            self.hand = 0;
        }
        entry
    }

    fn remove(&mut self, ppn: PhysPageNum) -> Option<FrameEntry> {
        let index = self.entries.iter().position(|entry| entry.ppn == ppn)?;
        Some(self.remove_at(index))
    }

    /// 从指针处开始扫描，清掉途经页的访问位，选中第一个访问位为 0 的页。
    ///
    /// 至多扫描两圈；第二圈时所有访问位都已被清掉，一定能选中
    fn clock_victim(&mut self) -> usize {
        let len = self.entries.len();
        assert!(len > 0, "no frame to evict");
        let mut examined = self.hand;
        for _ in 0..2 * len {
            examined = self.hand % len;
            self.hand = (examined + 1) % len;
            let entry = &self.entries[examined];
            let mut page_table = entry.page_table.lock();
            if !page_table.is_accessed(entry.vpn) {
                return examined;
            }
            page_table.set_accessed(entry.vpn, false);
        }
        examined
    }

    /// 驱逐一页，返回腾出的（已清零的）物理页
    fn evict(&mut self, vm: &VmContext) -> PhysPageNum {
        let victim = self.clock_victim();
        let FrameEntry {
            ppn,
            vpn,
            page,
            page_table,
        } = self.remove_at(victim);
        let mut page = page.lock();
        let dirty = page_table.lock().unmap(vpn);
        page.swap_out(vm, ppn, dirty);
        page.take_frame();
        vm.pool.with_page(ppn, |bytes| bytes.fill(0));
        self.evictions += 1;
        debug!("evict {vpn:?} from {ppn:?}");
        ppn
    }

    /// 优先从页池分配，否则驱逐
    fn acquire(&mut self, vm: &VmContext) -> PhysPageNum {
        match vm.pool.alloc_user_page() {
            Some(ppn) => ppn,
            None => self.evict(vm),
        }
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VmContext {
    /// 为 `page` 取得物理页、填充内容、建立映射并登记到帧表。
    ///
    /// 页已常驻时什么都不做。填充失败时物理页退回页池，页保持原状
    pub(crate) fn claim(&self, page_ref: &PageRef, page_table: &PageTableHandle) -> KResult<()> {
        let mut frames = self.frames.lock();
        let mut page = page_ref.lock();
        if page.is_resident() {
            return Ok(());
        }
        let ppn = scopeguard::guard(frames.acquire(self), |ppn| self.pool.free_page(ppn));
        page.swap_in(self, *ppn)?;
        let ppn = ScopeGuard::into_inner(ppn);
        page.set_frame(ppn);
        page_table.lock().map(page.vpn(), ppn, page.writable());
        frames.push(ppn, page.vpn(), page_ref.clone(), page_table.clone());
        Ok(())
    }

    /// 取一个空的物理页，由调用者自行填充后调用 [`Self::register_frame`]
    pub(crate) fn acquire_frame(&self) -> PhysPageNum {
        self.frames.lock().acquire(self)
    }

    pub(crate) fn register_frame(
        &self,
        ppn: PhysPageNum,
        page: &PageRef,
        page_table: &PageTableHandle,
    ) {
        let vpn = page.lock().vpn();
        self.frames.lock().push(ppn, vpn, page.clone(), page_table.clone());
    }

    /// 回收 `page` 占用的物理页。脏的文件页先写回
    pub(crate) fn release_frame(&self, page: &PageRef, page_table: &PageTableHandle) {
        let mut frames = self.frames.lock();
        let mut page = page.lock();
        let Some(ppn) = page.frame() else {
            return;
        };
        let dirty = page_table.lock().unmap(page.vpn());
        page.write_back(self, ppn, dirty);
        page.take_frame();
        frames.remove(ppn);
        self.pool.free_page(ppn);
    }
}
