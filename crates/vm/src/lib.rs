//! 用户虚拟内存：补充页表、惰性加载、帧表与时钟驱逐、交换区、mmap 以及 fork 时的地址空间复制
//!
//! 所有进程共享一个 [`VmContext`]，其中有用户页池、帧表和交换表；每个进程有自己的 [`MemorySpace`]。
//!
//! 加锁顺序固定为：帧表 → 页描述符 → 页表 → 交换表 → 物理页内容。

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod address;
mod file;
mod frame_allocator;
mod frame_table;
mod memory_space;
mod page;
mod page_table;
mod swap;
mod syscall;

#[cfg(test)]
mod test_utils;

use alloc::boxed::Box;

use klocks::SpinMutex;
use triomphe::Arc;

pub use self::address::{PhysPageNum, VirtAddr, VirtPageNum};
pub use self::file::{BackingFile, FileSegment, SharedFile, VmFile};
pub use self::frame_allocator::{PageBytes, UserPool};
pub use self::frame_table::FrameTable;
pub use self::memory_space::{MemorySpace, PageFault, SupplementalPageTable};
pub use self::page::{LazyLoad, Page, PageRef, PageType};
pub use self::page_table::{AccessFault, PTEFlags, PageTable, PageTableEntry, PageTableHandle};
pub use self::swap::{BlockDevice, SwapSlot, SwapTable};
pub use self::syscall::{sys_mmap, sys_munmap, FileTable};

/// 全局共享的物理内存状态
pub struct VmContext {
    pool: UserPool,
    frames: SpinMutex<FrameTable>,
    swap: SpinMutex<SwapTable>,
}

/// 某一时刻的统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub total_frames: usize,
    pub resident_frames: usize,
    pub evictions: usize,
    pub swap_slots: usize,
    pub swap_slots_in_use: usize,
}

impl VmContext {
    /// 用 `pool_pages` 个物理页作为用户页池，`swap_disk` 作为交换区
    pub fn new(pool_pages: usize, swap_disk: Box<dyn BlockDevice>) -> Arc<Self> {
        let swap = SwapTable::new(swap_disk);
        info!(
            "vm: {pool_pages} user pages, {} swap slots",
            swap.slot_count()
        );
        Arc::new(Self {
            pool: UserPool::new(pool_pages),
            frames: SpinMutex::new(FrameTable::new()),
            swap: SpinMutex::new(swap),
        })
    }

    pub fn stats(&self) -> VmStats {
        let (resident_frames, evictions) = {
            let frames = self.frames.lock();
            (frames.len(), frames.evictions())
        };
        let swap = self.swap.lock();
        VmStats {
            total_frames: self.pool.total_pages(),
            resident_frames,
            evictions,
            swap_slots: swap.slot_count(),
            swap_slots_in_use: swap.slots_in_use(),
        }
    }
}
