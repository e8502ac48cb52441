const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 磁盘扇区大小
pub const SECTOR_SIZE: usize = 512;
/// 一个交换槽（一页）所占的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 用户栈的栈顶（不含），栈向低地址增长
pub const USER_STACK: usize = 0x4748_0000;
/// 用户栈最多能增长到的大小
pub const STACK_LIMIT: usize = MB;
/// 栈指针之下仍视为栈访问的范围，用于容纳 `push` 之类先访存后移动栈指针的指令
pub const STACK_FAULT_SLACK: usize = PAGE_SIZE;

/// 用户地址空间的末端，也即内核地址的起点
pub const USER_END: usize = 0x80_0400_0000;

/// 控制台占用的文件描述符，不可被 mmap
pub const CONSOLE_FDS: [usize; 2] = [0, 1];
