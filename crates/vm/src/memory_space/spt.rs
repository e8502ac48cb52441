use defines::error::{errno, KResult};
use hashbrown::{hash_map::Entry, HashMap};

use crate::{address::VirtPageNum, page::PageRef};

/// 补充页表：虚拟页号到页描述符，一个虚拟页至多对应一项
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: HashMap<VirtPageNum, PageRef>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, vpn: VirtPageNum) -> Option<&PageRef> {
        self.pages.get(&vpn)
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// 已有该页时返回 `EEXIST`，不做任何修改
    pub fn insert(&mut self, page: PageRef) -> KResult<()> {
        let vpn = page.lock().vpn();
        match self.pages.entry(vpn) {
            Entry::Occupied(_) => Err(errno::EEXIST),
            Entry::Vacant(entry) => {
                entry.insert(page);
                Ok(())
            }
        }
    }

    /// 只是从表中移除，页的资源由调用者回收
    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<PageRef> {
        self.pages.remove(&vpn)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VirtPageNum, &PageRef)> {
        self.pages.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (VirtPageNum, PageRef)> + '_ {
        self.pages.drain()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::page::Page;

    fn anon(vpn: usize) -> PageRef {
        Page::new_anon(VirtPageNum(vpn), true).into_ref()
    }

    #[test]
    fn duplicate_insert_keeps_first() {
        let mut spt = SupplementalPageTable::new();
        let first = anon(5);
        spt.insert(first.clone()).unwrap();
        assert_eq!(spt.insert(anon(5)), Err(errno::EEXIST));
        assert_eq!(spt.len(), 1);
        assert!(triomphe::Arc::ptr_eq(spt.find(VirtPageNum(5)).unwrap(), &first));
    }

    proptest! {
        #[test]
        fn at_most_one_page_per_vpn(vpns in prop::collection::vec(0usize..64, 0..200)) {
            let mut spt = SupplementalPageTable::new();
            let mut expected = BTreeSet::new();
            for vpn in vpns {
                let inserted = spt.insert(anon(vpn)).is_ok();
                prop_assert_eq!(inserted, expected.insert(vpn));
            }
            prop_assert_eq!(spt.len(), expected.len());
            for (vpn, page) in spt.iter() {
                prop_assert_eq!(page.lock().vpn(), *vpn);
            }
        }
    }
}
