//! 用户页池：原始物理页的分配与释放，以及模拟的物理内存内容
//!
//! 这一层不知道页框表与换出，耗尽时只是返回 `None`，由 [`FrameTable`] 决定是否驱逐
//!
//! [`FrameTable`]: crate::frame_table::FrameTable

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use defines::config::PAGE_SIZE;
use klocks::SpinMutex;

use crate::address::PhysPageNum;

pub type PageBytes = [u8; PAGE_SIZE];

const BUDDY_ORDER: usize = 32;

type BuddyFrameAllocator = buddy_system_allocator::FrameAllocator<BUDDY_ORDER>;

pub struct UserPool {
    allocator: SpinMutex<BuddyFrameAllocator>,
    /// 每个物理页的内容，下标即物理页号
    memory: Box<[SpinMutex<PageBytes>]>,
    allocated: AtomicUsize,
}

impl UserPool {
    pub fn new(total_pages: usize) -> Self {
        let mut allocator = BuddyFrameAllocator::new();
        allocator.add_frame(0, total_pages);
        let memory = (0..total_pages)
            .map(|_| SpinMutex::new([0; PAGE_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            allocator: SpinMutex::new(allocator),
            memory,
            allocated: AtomicUsize::new(0),
        }
    }

    /// 分配并清空一个用户页。页池耗尽时返回 `None`
    pub fn alloc_user_page(&self) -> Option<PhysPageNum> {
        let ppn = PhysPageNum(self.allocator.lock().alloc(1)?);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        self.with_page(ppn, |bytes| bytes.fill(0));
        Some(ppn)
    }

    /// 需保证 `ppn` 之前确实分配出去，且不再被任何页表映射
    pub fn free_page(&self, ppn: PhysPageNum) {
        debug_assert!(ppn.0 < self.memory.len(), "{ppn:?} out of pool");
        self.allocator.lock().dealloc(ppn.0, 1);
        let prev = self.allocated.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "free on an empty pool");
    }

    pub fn with_page<R>(&self, ppn: PhysPageNum, f: impl FnOnce(&mut PageBytes) -> R) -> R {
        f(&mut self.memory[ppn.0].lock())
    }

    pub fn copy_page(&self, dst: PhysPageNum, src: PhysPageNum) {
        assert_ne!(dst, src, "copy a page onto itself");
        let src = self.memory[src.0].lock();
        self.memory[dst.0].lock().copy_from_slice(&*src);
    }

    pub fn total_pages(&self) -> usize {
        self.memory.len()
    }

    pub fn allocated_pages(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_recycles() {
        let pool = UserPool::new(3);
        let pages: Vec<_> = (0..3).map(|_| pool.alloc_user_page().unwrap()).collect();
        assert_eq!(pool.allocated_pages(), 3);
        assert!(pool.alloc_user_page().is_none());

        pool.with_page(pages[1], |bytes| bytes[7] = 0xaa);
        pool.free_page(pages[1]);
        let again = pool.alloc_user_page().unwrap();
        assert_eq!(again, pages[1]);
        // 重新分配的页应当被清零
        assert_eq!(pool.with_page(again, |bytes| bytes[7]), 0);
    }

    #[test]
    fn copies_whole_page() {
        let pool = UserPool::new(2);
        let a = pool.alloc_user_page().unwrap();
        let b = pool.alloc_user_page().unwrap();
        pool.with_page(a, |bytes| bytes.fill(0x5a));
        pool.copy_page(b, a);
        assert!(pool.with_page(b, |bytes| bytes.iter().all(|&x| x == 0x5a)));
    }
}
