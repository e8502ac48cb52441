//! mmap 相关系统调用的参数检查与分派

use defines::{
    config::CONSOLE_FDS,
    error::{errno, KResult},
};

use crate::{address::VirtAddr, file::VmFile, memory_space::MemorySpace};

/// 进程的文件描述符表
pub trait FileTable {
    fn get(&self, fd: usize) -> Option<&dyn VmFile>;
}

/// 把 `fd` 对应的文件映射到 `addr`，成功时返回映射的地址
pub fn sys_mmap(
    space: &mut MemorySpace,
    fds: &dyn FileTable,
    addr: usize,
    len: usize,
    writable: bool,
    fd: usize,
    offset: usize,
) -> KResult<usize> {
    debug!("mmap addr: {addr:#x}, len: {len:#x}, fd: {fd}, offset: {offset:#x}");
    if CONSOLE_FDS.contains(&fd) {
        warn!("cannot map console fd {fd}");
        return Err(errno::EBADF);
    }
    let file = fds.get(fd).ok_or(errno::EBADF)?;
    let va = space.try_map_file(VirtAddr(addr), len, writable, file, offset)?;
    Ok(va.0)
}

pub fn sys_munmap(space: &mut MemorySpace, addr: usize) -> KResult<()> {
    debug!("munmap addr: {addr:#x}");
    space.unmap(VirtAddr(addr))
}
