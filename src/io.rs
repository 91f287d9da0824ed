//! In-memory page store. Stands in for the file manager: pages are packed on
//! write and restored from their bytes on read.

use crate::errors::PageError;
use crate::identifiers::PageId;
use crate::paging::SlottedPage;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// page ids to packed page bytes.
static STORE: Lazy<Mutex<HashMap<PageId, Vec<u8>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn store() -> MutexGuard<'static, HashMap<PageId, Vec<u8>>> {
    // entries are only ever replaced whole
    STORE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Persists `page`, clearing its dirty flag first so the stored copy is clean.
pub fn write(page: &mut SlottedPage) {
    page.set_dirty(false);
    let bytes = page.pack().to_vec();
    tracing::debug!(
        target: "slotpage::io",
        page = page.page_id().page_num(),
        bytes = bytes.len(),
        "wrote page"
    );
    store().insert(page.page_id(), bytes);
}

pub fn read(page_id: PageId) -> Result<Option<SlottedPage>, PageError> {
    let bytes = match store().get(&page_id).cloned() {
        None => return Ok(None),
        Some(found) => found,
    };
    SlottedPage::unpack(page_id, bytes).map(Some)
}

/// Drops a stored page. Returns whether it was present.
pub fn evict(page_id: PageId) -> bool {
    store().remove(&page_id).is_some()
}

#[cfg(test)]
use crate::identifiers::{FileId, TupleId};
#[cfg(test)]
use crate::schema::{FieldType, Schema, Value};

#[test]
fn written_pages_read_back_clean() -> Result<(), PageError> {
    let schema = Schema::new("pair", vec![("a", FieldType::Int), ("b", FieldType::Long)])?;
    let page_id = PageId::new(FileId(40), 1);
    let mut page = SlottedPage::new(page_id, vec![0u8; 512], &schema)?;
    let record = schema.instantiate([Value::Int(1), Value::Long(10)])?;
    let tid = page.insert_tuple(&schema.pack(&record)?).expect("room");
    assert!(page.is_dirty());

    write(&mut page);
    assert!(!page.is_dirty());

    let loaded = read(page_id)?.expect("stored page");
    assert!(!loaded.is_dirty());
    assert_eq!(loaded.header(), page.header());
    let stored = schema.unpack(loaded.get_tuple(tid).expect("tuple present"))?;
    assert_eq!(stored, record);
    assert_eq!(loaded.get_tuple(TupleId::new(page_id, 1)), None);
    Ok(())
}

#[test]
fn missing_and_evicted_pages_read_as_none() -> Result<(), PageError> {
    let schema = Schema::new("single", vec![("a", FieldType::Int)])?;
    let page_id = PageId::new(FileId(40), 2);
    assert!(read(page_id)?.is_none());

    let mut page = SlottedPage::new(page_id, vec![0u8; 256], &schema)?;
    write(&mut page);
    assert!(read(page_id)?.is_some());
    assert!(evict(page_id));
    assert!(!evict(page_id));
    assert!(read(page_id)?.is_none());
    Ok(())
}
