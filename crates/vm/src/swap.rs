//! 交换区：用位图管理磁盘上按页大小划分的槽

use alloc::{boxed::Box, vec, vec::Vec};

use bit_field::BitField;
use defines::config::{SECTORS_PER_PAGE, SECTOR_SIZE};

use crate::frame_allocator::PageBytes;

/// 交换区所在的块设备，只需要按扇区读写
pub trait BlockDevice: Send + Sync {
    fn read_sector(&self, sector: usize, buf: &mut [u8; SECTOR_SIZE]);
    fn write_sector(&self, sector: usize, buf: &[u8; SECTOR_SIZE]);
    /// 设备的扇区数
    fn sector_count(&self) -> usize;
}

/// 交换槽下标。同一时刻至多被一个匿名页持有
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub fn index(self) -> usize {
        self.0
    }

    fn first_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

pub struct SwapTable {
    disk: Box<dyn BlockDevice>,
    /// 每一位对应一个槽，置位表示已占用
    bitmap: Vec<u64>,
    slot_count: usize,
    used: usize,
}

impl SwapTable {
    pub fn new(disk: Box<dyn BlockDevice>) -> Self {
        let slot_count = disk.sector_count() / SECTORS_PER_PAGE;
        Self {
            disk,
            bitmap: vec![0; slot_count.div_ceil(u64::BIT_LENGTH)],
            slot_count,
            used: 0,
        }
    }

    /// 找到第一个空闲槽并占用。交换区满了返回 `None`
    pub fn alloc_slot(&mut self) -> Option<SwapSlot> {
        let (word_index, word) = self
            .bitmap
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let bit = (!*word).trailing_zeros() as usize;
        let index = word_index * u64::BIT_LENGTH + bit;
        if index >= self.slot_count {
            return None;
        }
        word.set_bit(bit, true);
        self.used += 1;
        Some(SwapSlot(index))
    }

    pub fn free_slot(&mut self, slot: SwapSlot) {
        let (word, bit) = Self::locate(slot);
        assert!(
            self.bitmap[word].get_bit(bit),
            "double free of swap slot {}",
            slot.0
        );
        self.bitmap[word].set_bit(bit, false);
        self.used -= 1;
    }

    pub fn write(&self, slot: SwapSlot, page: &PageBytes) {
        debug_assert!(self.is_used(slot));
        let mut sector = [0; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            sector.copy_from_slice(chunk);
            self.disk.write_sector(slot.first_sector() + i, &sector);
        }
    }

    pub fn read(&self, slot: SwapSlot, page: &mut PageBytes) {
        debug_assert!(self.is_used(slot));
        let mut sector = [0; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.disk.read_sector(slot.first_sector() + i, &mut sector);
            chunk.copy_from_slice(&sector);
        }
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        let (word, bit) = Self::locate(slot);
        self.bitmap[word].get_bit(bit)
    }

    pub fn slots_in_use(&self) -> usize {
        self.used
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn locate(slot: SwapSlot) -> (usize, usize) {
        (slot.0 / u64::BIT_LENGTH, slot.0 % u64::BIT_LENGTH)
    }
}
