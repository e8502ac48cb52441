use core::{fmt, ops::Add};

use defines::config::{PAGE_OFFSET_MASK, PAGE_SIZE_BITS, USER_END};

/// 物理页号。模拟的物理内存里就是页池中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPageNum(pub usize);

/// 用户虚拟地址
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn page_offset(&self) -> usize {
        self.0 & PAGE_OFFSET_MASK
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// 向下取整页号
    pub const fn vpn_floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }

    pub const fn is_user(&self) -> bool {
        self.0 < USER_END
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// 虚拟页号，补充页表的键
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(pub usize);

impl VirtPageNum {
    pub const fn page_start(&self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SIZE_BITS)
    }
}

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPageNum({:#x})", self.0)
    }
}

impl Add<usize> for VirtPageNum {
    type Output = Self;

    fn add(self, len: usize) -> Self::Output {
        Self(self.0 + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_pages() {
        let va = VirtAddr(0x1234_5678);
        assert_eq!(va.page_offset(), 0x678);
        assert_eq!(va.vpn_floor(), VirtPageNum(0x12345));
        assert!(VirtAddr(0x2000).is_page_aligned());
        assert_eq!(VirtPageNum(0x12345) + 1, VirtAddr(0x1234_6000).vpn_floor());
        assert_eq!(VirtPageNum(3).page_start(), VirtAddr(0x3000));
    }

    #[test]
    fn kernel_addresses_are_not_user() {
        assert!(VirtAddr(0x4000).is_user());
        assert!(!VirtAddr(USER_END).is_user());
    }
}
