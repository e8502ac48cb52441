//! 内核访问用户内存。像 MMU 一样查页表、置访问位与脏位，缺页时走缺页处理

use defines::{
    config::PAGE_SIZE,
    error::{errno, KResult},
};

use super::{MemorySpace, PageFault};
use crate::{
    address::{VirtAddr, VirtPageNum},
    frame_allocator::PageBytes,
    page_table::AccessFault,
};

impl MemorySpace {
    /// 从用户地址 `va` 读 `buf.len()` 个字节
    pub fn read_user(&mut self, va: VirtAddr, buf: &mut [u8]) -> KResult<()> {
        let mut copied = 0;
        for (vpn, range) in page_chunks(va, buf.len())? {
            let len = range.len();
            self.with_user_page(vpn, false, |bytes| {
                buf[copied..copied + len].copy_from_slice(&bytes[range]);
            })?;
            copied += len;
        }
        Ok(())
    }

    /// 把 `data` 写到用户地址 `va`
    pub fn write_user(&mut self, va: VirtAddr, data: &[u8]) -> KResult<()> {
        let mut copied = 0;
        for (vpn, range) in page_chunks(va, data.len())? {
            let len = range.len();
            self.with_user_page(vpn, true, |bytes| {
                bytes[range].copy_from_slice(&data[copied..copied + len]);
            })?;
            copied += len;
        }
        Ok(())
    }

    /// 用户指针是否可能合法：已登记的页，或者栈指针之上的栈区域
    pub fn check_address(&self, va: VirtAddr) -> bool {
        va.0 != 0 && va.is_user() && (self.spt.contains(va.vpn_floor()) || self.is_stack_access(va))
    }

    /// 页表锁在访问期间一直持有，驱逐必须先拿到它才能移除映射
    fn with_user_page<R>(
        &mut self,
        vpn: VirtPageNum,
        write: bool,
        f: impl FnOnce(&mut PageBytes) -> R,
    ) -> KResult<R> {
        loop {
            {
                let mut page_table = self.page_table.lock();
                match page_table.access(vpn, write) {
                    Ok(ppn) => return Ok(self.vm.pool.with_page(ppn, f)),
                    Err(AccessFault::Protection) => {
                        warn!("write to read-only page {vpn:?}");
                        return Err(errno::EFAULT);
                    }
                    Err(AccessFault::NotPresent) => {}
                }
            }
            self.handle_page_fault(PageFault {
                addr: vpn.page_start().0,
                write,
                user: false,
                not_present: true,
            })?;
        }
    }
}

/// 把 `[va, va + len)` 按页切开
fn page_chunks(
    va: VirtAddr,
    len: usize,
) -> KResult<impl Iterator<Item = (VirtPageNum, core::ops::Range<usize>)>> {
    let end = va.0.checked_add(len).ok_or(errno::EFAULT)?;
    if len > 0 && !(va.is_user() && VirtAddr(end - 1).is_user()) {
        return Err(errno::EFAULT);
    }
    let mut cursor = va.0;
    Ok(core::iter::from_fn(move || {
        if cursor >= end {
            return None;
        }
        let offset = cursor % PAGE_SIZE;
        let chunk = (PAGE_SIZE - offset).min(end - cursor);
        let vpn = VirtAddr(cursor).vpn_floor();
        cursor += chunk;
        Some((vpn, offset..offset + chunk))
    }))
}
