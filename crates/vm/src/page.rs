//! 页描述符：补充页表中的一项，描述一个虚拟页当前的状态
//!
//! 三种状态用封闭的枚举表示，换入、换出与销毁按变体分派

use defines::error::{errno, KResult};
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    address::{PhysPageNum, VirtPageNum},
    file::{FileSegment, SharedFile},
    swap::SwapSlot,
    VmContext,
};

pub type PageRef = Arc<SpinMutex<Page>>;

/// 页初始化之后的类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Anon,
    File,
}

/// 未初始化页第一次被访问时的填充方式
#[derive(Clone)]
pub enum LazyLoad {
    /// 全零页
    Zero,
    /// 从文件读入，不足一页的部分补零
    File(FileSegment),
}

enum PageKind {
    /// 尚未分配过物理页，首次缺页时按 `init` 填充并变为 `target`
    Uninit { init: LazyLoad, target: PageType },
    /// 匿名页。被换出时记录交换槽
    Anon { slot: Option<SwapSlot> },
    /// 文件页，换出时写回文件（如果脏），换入时重新读文件
    File(FileSegment),
}

pub struct Page {
    vpn: VirtPageNum,
    writable: bool,
    /// 常驻时对应的物理页
    frame: Option<PhysPageNum>,
    kind: PageKind,
}

impl Page {
    /// 目标为 [`PageType::File`] 的页必须从文件加载
    pub fn new_uninit(
        vpn: VirtPageNum,
        writable: bool,
        init: LazyLoad,
        target: PageType,
    ) -> KResult<Self> {
        if target == PageType::File && matches!(init, LazyLoad::Zero) {
            return Err(errno::EINVAL);
        }
        Ok(Self {
            vpn,
            writable,
            frame: None,
            kind: PageKind::Uninit { init, target },
        })
    }

    pub(crate) fn new_anon(vpn: VirtPageNum, writable: bool) -> Self {
        Self {
            vpn,
            writable,
            frame: None,
            kind: PageKind::Anon { slot: None },
        }
    }

    pub(crate) fn new_file(vpn: VirtPageNum, writable: bool, segment: FileSegment) -> Self {
        Self {
            vpn,
            writable,
            frame: None,
            kind: PageKind::File(segment),
        }
    }

    pub fn into_ref(self) -> PageRef {
        Arc::new(SpinMutex::new(self))
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn frame(&self) -> Option<PhysPageNum> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_uninit(&self) -> bool {
        matches!(self.kind, PageKind::Uninit { .. })
    }

    /// 页初始化之后（或已经）是什么类型
    pub fn page_type(&self) -> PageType {
        match &self.kind {
            PageKind::Uninit { target, .. } => *target,
            PageKind::Anon { .. } => PageType::Anon,
            PageKind::File(_) => PageType::File,
        }
    }

    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match self.kind {
            PageKind::Anon { slot } => slot,
            _ => None,
        }
    }

    /// 页所属的文件映射。未初始化的文件页也算
    pub fn mapped_file(&self) -> Option<&SharedFile> {
        match &self.kind {
            PageKind::File(segment)
            | PageKind::Uninit {
                init: LazyLoad::File(segment),
                target: PageType::File,
            } => Some(&segment.file),
            _ => None,
        }
    }

    /// 未初始化页的加载方式，fork 时原样复制给子进程
    pub(crate) fn lazy_load(&self) -> Option<(LazyLoad, PageType)> {
        match &self.kind {
            PageKind::Uninit { init, target } => Some((init.clone(), *target)),
            _ => None,
        }
    }

    pub(crate) fn file_segment(&self) -> Option<&FileSegment> {
        match &self.kind {
            PageKind::File(segment) => Some(segment),
            _ => None,
        }
    }

    pub(crate) fn set_frame(&mut self, ppn: PhysPageNum) {
        debug_assert!(self.frame.is_none(), "{:?} is already resident", self.vpn);
        self.frame = Some(ppn);
    }

    pub(crate) fn take_frame(&mut self) -> Option<PhysPageNum> {
        self.frame.take()
    }

    /// 把页的内容填入新拿到的物理页 `ppn`（已清零）。
    ///
    /// 未初始化页在成功后转为目标类型；失败时页保持原状，物理页由调用者回收
    pub(crate) fn swap_in(&mut self, vm: &VmContext, ppn: PhysPageNum) -> KResult<()> {
        match &mut self.kind {
            PageKind::Uninit { init, target } => {
                let kind = match init {
                    LazyLoad::File(segment) => {
                        vm.pool.with_page(ppn, |bytes| segment.load(bytes))?;
                        match target {
                            PageType::File => PageKind::File(segment.clone()),
                            PageType::Anon => PageKind::Anon { slot: None },
                        }
                    }
                    LazyLoad::Zero => PageKind::Anon { slot: None },
                };
                self.kind = kind;
            }
            PageKind::Anon { slot } => {
                if let Some(slot) = slot.take() {
                    let mut swap = vm.swap.lock();
                    vm.pool.with_page(ppn, |bytes| swap.read(slot, bytes));
                    swap.free_slot(slot);
                    debug!("swap in {:?} from slot {}", self.vpn, slot.index());
                }
            }
            PageKind::File(segment) => {
                vm.pool.with_page(ppn, |bytes| segment.load(bytes))?;
            }
        }
        Ok(())
    }

    /// 驱逐时保存内容：匿名页写入交换区，脏的文件页写回文件。
    ///
    /// 调用前映射已经从页表中移除，`dirty` 是移除前的脏位
    pub(crate) fn swap_out(&mut self, vm: &VmContext, ppn: PhysPageNum, dirty: bool) {
        match &mut self.kind {
            PageKind::Anon { slot } => {
                debug_assert!(slot.is_none());
                let mut swap = vm.swap.lock();
                let Some(new_slot) = swap.alloc_slot() else {
                    error!("swap is full, {} slots in use", swap.slots_in_use());
                    panic!("out of swap slots");
                };
                vm.pool.with_page(ppn, |bytes| swap.write(new_slot, bytes));
                *slot = Some(new_slot);
                debug!("swap out {:?} to slot {}", self.vpn, new_slot.index());
            }
            PageKind::File(segment) => {
                if dirty {
                    vm.pool.with_page(ppn, |bytes| segment.write_back(bytes));
                }
            }
            PageKind::Uninit { .. } => unreachable!("uninit page {:?} is resident", self.vpn),
        }
    }

    /// 文件页如果脏了就写回文件，其他页什么都不做
    pub(crate) fn write_back(&self, vm: &VmContext, ppn: PhysPageNum, dirty: bool) {
        if let (true, PageKind::File(segment)) = (dirty, &self.kind) {
            vm.pool.with_page(ppn, |bytes| segment.write_back(bytes));
        }
    }

    /// 把当前内容复制到 `dst`，不改变本页的状态。未初始化页不应走到这里
    pub(crate) fn copy_into(&self, vm: &VmContext, dst: PhysPageNum) -> KResult<()> {
        if let Some(ppn) = self.frame {
            vm.pool.copy_page(dst, ppn);
            return Ok(());
        }
        match &self.kind {
            PageKind::Anon { slot: Some(slot) } => {
                let swap = vm.swap.lock();
                vm.pool.with_page(dst, |bytes| swap.read(*slot, bytes));
            }
            PageKind::Anon { slot: None } => {}
            PageKind::File(segment) => vm.pool.with_page(dst, |bytes| segment.load(bytes))?,
            PageKind::Uninit { .. } => unreachable!("copy uninit page {:?}", self.vpn),
        }
        Ok(())
    }

    /// 释放页持有的交换槽。物理页应当已经由帧表回收
    pub(crate) fn destroy(&mut self, vm: &VmContext) {
        debug_assert!(self.frame.is_none());
        if let PageKind::Anon { slot } = &mut self.kind {
            if let Some(slot) = slot.take() {
                vm.swap.lock().free_slot(slot);
            }
        }
    }
}
