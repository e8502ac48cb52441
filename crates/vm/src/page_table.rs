//! Implementation of [`PageTableEntry`] and [`PageTable`].
//!
//! 这里的页表只是硬件页表的软件替身：映射、查询/清除访问位与脏位这些原语
//! 被视为硬件提供的、总是正确的操作。访存时由 [`PageTable::access`] 模拟 MMU
//! 置位 A/D 的行为

use bitflags::bitflags;
use hashbrown::HashMap;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::address::{PhysPageNum, VirtPageNum};

bitflags! {
    /// page table entry flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u16 {
        const V =   1 << 0;
        const R =   1 << 1;
        const W =   1 << 2;
        const X =   1 << 3;
        const U =   1 << 4;
        const G =   1 << 5;
        const A =   1 << 6;
        const D =   1 << 7;
    }
}

/// page table entry structure
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    pub fn ppn(&self) -> PhysPageNum {
        const LOW_44_MASK: usize = (1 << 44) - 1;
        PhysPageNum((self.bits >> 10) & LOW_44_MASK)
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u16)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    fn set_flag(&mut self, flag: PTEFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        *self = Self::new(self.ppn(), flags);
    }
}

/// 模拟访存时 MMU 报告的异常
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessFault {
    /// 页表项无效
    NotPresent,
    /// 页表项有效，但权限不足（写只读页）
    Protection,
}

/// 一个进程的页表。帧表通过 [`PageTableHandle`] 反查访问位与脏位
#[derive(Default)]
pub struct PageTable {
    entries: HashMap<VirtPageNum, PageTableEntry>,
}

pub type PageTableHandle = Arc<SpinMutex<PageTable>>;

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_handle() -> PageTableHandle {
        Arc::new(SpinMutex::new(Self::new()))
    }

    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) {
        let mut flags = PTEFlags::V | PTEFlags::R | PTEFlags::U;
        if writable {
            flags |= PTEFlags::W;
        }
        let old = self.entries.insert(vpn, PageTableEntry::new(ppn, flags));
        debug_assert!(
            old.map_or(true, |pte| !pte.is_valid()),
            "{vpn:?} is mapped before mapping"
        );
    }

    /// 移除映射，返回移除前的脏位
    pub fn unmap(&mut self, vpn: VirtPageNum) -> bool {
        let old = self.entries.remove(&vpn);
        debug_assert!(old.is_some(), "{vpn:?} is invalid before unmapping");
        old.is_some_and(|pte| pte.flags().contains(PTEFlags::D))
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        self.entries
            .get(&vpn)
            .filter(|pte| pte.is_valid())
            .map(PageTableEntry::ppn)
    }

    pub fn entry(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.flag(vpn, PTEFlags::A)
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, accessed: bool) {
        self.set_flag(vpn, PTEFlags::A, accessed);
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.flag(vpn, PTEFlags::D)
    }

    pub fn set_dirty(&mut self, vpn: VirtPageNum, dirty: bool) {
        self.set_flag(vpn, PTEFlags::D, dirty);
    }

    /// 模拟一次用户访存：检查表项与权限，并像硬件一样置位 A（写时还有 D）
    pub fn access(&mut self, vpn: VirtPageNum, write: bool) -> Result<PhysPageNum, AccessFault> {
        let pte = self
            .entries
            .get_mut(&vpn)
            .filter(|pte| pte.is_valid())
            .ok_or(AccessFault::NotPresent)?;
        if write && !pte.writable() {
            return Err(AccessFault::Protection);
        }
        pte.set_flag(PTEFlags::A, true);
        if write {
            pte.set_flag(PTEFlags::D, true);
        }
        Ok(pte.ppn())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flag(&self, vpn: VirtPageNum, flag: PTEFlags) -> bool {
        self.entries
            .get(&vpn)
            .is_some_and(|pte| pte.flags().contains(flag))
    }

    fn set_flag(&mut self, vpn: VirtPageNum, flag: PTEFlags, value: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set_flag(flag, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_sets_accessed_and_dirty() {
        let mut pt = PageTable::new();
        let vpn = VirtPageNum(0x10);
        pt.map(vpn, PhysPageNum(3), true);
        assert!(!pt.is_accessed(vpn));
        assert_eq!(pt.access(vpn, false), Ok(PhysPageNum(3)));
        assert!(pt.is_accessed(vpn));
        assert!(!pt.is_dirty(vpn));
        pt.access(vpn, true).unwrap();
        assert!(pt.is_dirty(vpn));
        pt.set_accessed(vpn, false);
        pt.set_dirty(vpn, false);
        assert!(!pt.is_accessed(vpn) && !pt.is_dirty(vpn));
        assert_eq!(pt.translate(vpn), Some(PhysPageNum(3)));
        pt.access(vpn, true).unwrap();
        assert!(pt.unmap(vpn));
    }

    #[test]
    fn faults_on_missing_or_readonly() {
        let mut pt = PageTable::new();
        let vpn = VirtPageNum(0x20);
        assert_eq!(pt.access(vpn, false), Err(AccessFault::NotPresent));
        pt.map(vpn, PhysPageNum(1), false);
        assert_eq!(pt.access(vpn, true), Err(AccessFault::Protection));
        pt.unmap(vpn);
        assert_eq!(pt.translate(vpn), None);
        assert!(pt.is_empty());
    }
}
