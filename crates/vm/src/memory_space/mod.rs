//! 进程的用户地址空间

mod fork;
mod mmap;
mod spt;
mod user_check;

use alloc::vec::Vec;

use defines::{
    config::{PAGE_SIZE, STACK_FAULT_SLACK, STACK_LIMIT, USER_STACK},
    error::{errno, KResult},
};
use triomphe::Arc;

pub use self::spt::SupplementalPageTable;
use crate::{
    address::{PhysPageNum, VirtAddr, VirtPageNum},
    page::{LazyLoad, Page, PageRef, PageType},
    page_table::{PageTable, PageTableHandle},
    VmContext,
};

/// 缺页异常的信息，由 trap 处理程序填写
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    pub addr: usize,
    pub write: bool,
    /// 是否发生在用户态
    pub user: bool,
    /// 缺页（而非权限错误）
    pub not_present: bool,
}

/// 进程的内存地址空间
pub struct MemorySpace {
    vm: Arc<VmContext>,
    spt: SupplementalPageTable,
    page_table: PageTableHandle,
    /// 最近一次从用户态进入内核时的栈指针，判断栈增长时使用
    user_sp: usize,
}

impl MemorySpace {
    pub fn new(vm: Arc<VmContext>) -> Self {
        Self {
            vm,
            spt: SupplementalPageTable::new(),
            page_table: PageTable::new_handle(),
            user_sp: USER_STACK,
        }
    }

    pub fn vm(&self) -> &Arc<VmContext> {
        &self.vm
    }

    pub fn page_table(&self) -> &PageTableHandle {
        &self.page_table
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn user_sp(&self) -> usize {
        self.user_sp
    }

    pub fn set_user_sp(&mut self, sp: usize) {
        self.user_sp = sp;
    }

    pub fn translate(&self, va: VirtAddr) -> Option<PhysPageNum> {
        self.page_table.lock().translate(va.vpn_floor())
    }

    /// 页初始化后的类型。没有该页时返回 `None`
    pub fn page_type(&self, va: VirtAddr) -> Option<PageType> {
        Some(self.spt.find(va.vpn_floor())?.lock().page_type())
    }

    /// 在 `va` 处登记一个未初始化的页，第一次访问时才真正分配物理页
    pub fn alloc_page(
        &mut self,
        va: VirtAddr,
        writable: bool,
        init: LazyLoad,
        target: PageType,
    ) -> KResult<()> {
        if !va.is_page_aligned() || !va.is_user() {
            return Err(errno::EINVAL);
        }
        let page = Page::new_uninit(va.vpn_floor(), writable, init, target)?;
        self.spt.insert(page.into_ref())
    }

    /// 不经过缺页，直接让已登记的页驻留
    pub fn claim_page(&mut self, va: VirtAddr) -> KResult<()> {
        let page = self.spt.find(va.vpn_floor()).ok_or(errno::EFAULT)?;
        self.vm.claim(page, &self.page_table)
    }

    /// 缺页处理的唯一入口。返回 `EFAULT` 时调用者应当杀死该进程
    pub fn handle_page_fault(&mut self, fault: PageFault) -> KResult<()> {
        trace!(
            "page fault at {:#x}, write: {}, user: {}",
            fault.addr,
            fault.write,
            fault.user
        );
        let va = VirtAddr(fault.addr);
        if !va.is_user() {
            warn!("page fault on kernel address {va:?}");
            return Err(errno::EFAULT);
        }
        if !fault.not_present {
            // 没有写时复制，fork 出的匿名页都是独立的拷贝
            warn!("write to read-only page at {va:?}");
            return Err(errno::EFAULT);
        }
        let vpn = va.vpn_floor();
        if let Some(page) = self.spt.find(vpn) {
            if fault.write && !page.lock().writable() {
                warn!("write to read-only page at {va:?}");
                return Err(errno::EFAULT);
            }
            return self.vm.claim(page, &self.page_table);
        }
        if self.is_stack_access(va) {
            return self.grow_stack(vpn);
        }
        warn!("invalid access to {va:?}, user sp {:#x}", self.user_sp);
        Err(errno::EFAULT)
    }

    /// 在栈区域内，且不低于栈指针下方一页
    fn is_stack_access(&self, va: VirtAddr) -> bool {
        va.0 < USER_STACK
            && va.0 >= USER_STACK - STACK_LIMIT
            && va.0 + STACK_FAULT_SLACK >= self.user_sp
    }

    fn grow_stack(&mut self, vpn: VirtPageNum) -> KResult<()> {
        debug!("grow stack to {vpn:?}");
        self.alloc_page(vpn.page_start(), true, LazyLoad::Zero, PageType::Anon)?;
        self.claim_page(vpn.page_start())
    }

    /// 分配并驻留栈顶的第一页，返回初始的栈指针
    pub fn setup_stack(&mut self) -> KResult<usize> {
        let stack_bottom = VirtAddr(USER_STACK - PAGE_SIZE);
        self.alloc_page(stack_bottom, true, LazyLoad::Zero, PageType::Anon)?;
        self.claim_page(stack_bottom)?;
        self.user_sp = USER_STACK;
        Ok(USER_STACK)
    }

    /// 移除并销毁 `va` 处的页。脏的文件页会先写回
    pub fn remove_page(&mut self, va: VirtAddr) -> KResult<()> {
        let page = self.spt.remove(va.vpn_floor()).ok_or(errno::EINVAL)?;
        self.destroy_page(&page);
        Ok(())
    }

    fn destroy_page(&self, page: &PageRef) {
        self.vm.release_frame(page, &self.page_table);
        page.lock().destroy(&self.vm);
    }

    /// 销毁所有用户页，进程退出时调用
    pub fn recycle_user_pages(&mut self) {
        let pages = self.spt.drain().map(|(_, page)| page).collect::<Vec<_>>();
        if !pages.is_empty() {
            debug!("recycle {} user pages", pages.len());
        }
        for page in pages {
            self.destroy_page(&page);
        }
        debug_assert!(self.page_table.lock().is_empty());
    }
}

impl Drop for MemorySpace {
    fn drop(&mut self) {
        self.recycle_user_pages();
    }
}
