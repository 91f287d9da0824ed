//! Identifiers handed out by the file layer. A page only reads them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A page within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    file_id: FileId,
    page_num: u32,
}

impl PageId {
    pub const fn new(file_id: FileId, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    pub const fn file_id(&self) -> FileId {
        self.file_id
    }

    pub const fn page_num(&self) -> u32 {
        self.page_num
    }
}

/// Addresses one tuple: the page holding it and its slot index in that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId {
    page_id: PageId,
    tuple_index: u16,
}

impl TupleId {
    pub const fn new(page_id: PageId, tuple_index: u16) -> Self {
        Self {
            page_id,
            tuple_index,
        }
    }

    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    pub const fn tuple_index(&self) -> u16 {
        self.tuple_index
    }
}

#[test]
fn tuple_ids_compare_by_page_then_slot() {
    let p1 = PageId::new(FileId(1), 100);
    let p2 = PageId::new(FileId(1), 101);
    assert_eq!(p1.file_id(), FileId(1));
    assert_eq!(p1.page_num(), 100);
    assert_eq!(TupleId::new(p1, 3), TupleId::new(p1, 3));
    assert_ne!(TupleId::new(p1, 3), TupleId::new(p2, 3));
    assert!(TupleId::new(p1, 9) < TupleId::new(p2, 0));
    assert_eq!(TupleId::new(p2, 4).tuple_index(), 4);
}
