//! A slotted page: one fixed-capacity buffer holding a [`SlotHeader`] followed
//! by equally sized tuple slots.
//!
//! ```text
//! | slot header | slot 0 | slot 1 | ... | slot n-1 | unused tail |
//! ```
//!
//! Tuples are addressed by [`TupleId`], whose tuple index is the slot index.
//! Every occupancy change goes through the header; the page only moves bytes.
//! Operations on a slot that is not occupied return `None` instead of failing,
//! since an outer layer may still hold ids from before a delete or reload.

use crate::errors::PageError;
use crate::header::SlotHeader;
use crate::identifiers::{PageId, TupleId};
use crate::schema::Schema;
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct SlottedPage {
    page_id: PageId,
    buffer: Vec<u8>,
    header: SlotHeader,
}

impl SlottedPage {
    /// Creates an empty page over `buffer`, sized for `schema`'s records. The
    /// whole buffer is the page.
    pub fn new(page_id: PageId, mut buffer: Vec<u8>, schema: &Schema) -> Result<Self, PageError> {
        if buffer.is_empty() {
            return Err(PageError::MissingBuffer);
        }
        let header = SlotHeader::new(&mut buffer, schema.size(), None)?;
        tracing::debug!(
            target: "slotpage::page",
            file = page_id.file_id().0,
            page = page_id.page_num(),
            schema = schema.name(),
            slots = header.num_slots(),
            "created slotted page"
        );
        Ok(Self {
            page_id,
            buffer,
            header,
        })
    }

    /// Wraps `buffer` with an existing header. The buffer must be exactly
    /// `header.page_capacity()` bytes long.
    pub fn with_header(
        page_id: PageId,
        buffer: Vec<u8>,
        header: SlotHeader,
    ) -> Result<Self, PageError> {
        if buffer.is_empty() {
            return Err(PageError::MissingBuffer);
        }
        if buffer.len() < header.page_capacity() {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: header.page_capacity(),
            });
        }
        if buffer.len() > header.page_capacity() {
            return Err(PageError::CapacityMismatch {
                len: buffer.len(),
                capacity: header.page_capacity(),
            });
        }
        Ok(Self {
            page_id,
            buffer,
            header,
        })
    }

    /// Restores a page from bytes produced by [`SlottedPage::pack`].
    pub fn unpack(page_id: PageId, buffer: Vec<u8>) -> Result<Self, PageError> {
        let header = SlotHeader::unpack(&buffer)?;
        tracing::debug!(
            target: "slotpage::page",
            file = page_id.file_id().0,
            page = page_id.page_num(),
            tuples = header.num_tuples(),
            "unpacked slotted page"
        );
        Self::with_header(page_id, buffer, header)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn header(&self) -> &SlotHeader {
        &self.header
    }

    pub fn is_dirty(&self) -> bool {
        self.header.is_dirty()
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.header.set_dirty(dirty);
    }

    fn occupied_slot(&self, id: TupleId) -> Option<u16> {
        if id.page_id() != self.page_id {
            return None;
        }
        let slot = id.tuple_index();
        self.header.has_slot(slot).then_some(slot)
    }

    pub fn get_tuple(&self, id: TupleId) -> Option<&[u8]> {
        let slot = self.occupied_slot(id)?;
        Some(&self.buffer[self.header.slot_range(slot)])
    }

    /// Overwrites an occupied tuple in place.
    pub fn put_tuple(&mut self, id: TupleId, data: &[u8]) -> Option<()> {
        let slot = self.occupied_slot(id)?;
        let range = self.header.slot_range(slot);
        self.write_slot(range, data);
        self.set_dirty(true);
        Some(())
    }

    /// Stores `data` in the oldest free slot. Returns `None` when the page is full.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Option<TupleId> {
        let (slot, start, end) = self.header.allocate_range()?;
        self.write_slot(start..end, data);
        self.set_dirty(true);
        Some(TupleId::new(self.page_id, slot))
    }

    /// Zeroes a tuple's bytes. The slot stays occupied.
    pub fn clear_tuple(&mut self, id: TupleId) -> Option<()> {
        let slot = self.occupied_slot(id)?;
        let range = self.header.slot_range(slot);
        self.buffer[range].fill(0);
        self.set_dirty(true);
        Some(())
    }

    /// Removes a tuple and shifts every later slot one slot width down, so
    /// tuples after it keep their relative order but their slot index drops by one.
    pub fn delete_tuple(&mut self, id: TupleId) -> Option<()> {
        let slot = self.occupied_slot(id)?;
        let hole = self.header.slot_range(slot);
        let region = self.header.tuple_region();

        self.buffer.copy_within(hole.end..region.end, hole.start);
        self.buffer[region.end - self.header.tuple_size()..region.end].fill(0);
        self.header.remove_and_compact(slot);
        self.set_dirty(true);

        tracing::trace!(
            target: "slotpage::page",
            page = self.page_id.page_num(),
            slot,
            remaining = self.header.num_tuples(),
            "deleted tuple"
        );
        Some(())
    }

    /// Copies `data` into `range`. Short input is zero-padded and long input
    /// truncated; matching the tuple size is the caller's job.
    fn write_slot(&mut self, range: Range<usize>, data: &[u8]) {
        let len = data.len().min(range.len());
        if data.len() != range.len() {
            tracing::warn!(
                target: "slotpage::page",
                page = self.page_id.page_num(),
                expected = range.len(),
                actual = data.len(),
                "tuple length does not match slot size"
            );
        }
        let split = range.start + len;
        self.buffer[range.start..split].copy_from_slice(&data[..len]);
        self.buffer[split..range.end].fill(0);
    }

    /// Tuple bytes in used-slot order: insertion order until a delete or an
    /// unpack renumbers the slots, ascending slot order after that.
    pub fn iter(&self) -> Tuples<'_> {
        Tuples {
            page: self,
            position: 0,
        }
    }

    /// Like [`SlottedPage::iter`], paired with each tuple's id.
    pub fn tuples(&self) -> impl Iterator<Item = (TupleId, &[u8])> + '_ {
        self.header.used_slots().iter().map(move |&slot| {
            (
                TupleId::new(self.page_id, slot),
                &self.buffer[self.header.slot_range(slot)],
            )
        })
    }

    /// Writes the header into the front of the buffer and returns the page bytes.
    pub fn pack(&mut self) -> &[u8] {
        self.header.write_prefix(&mut self.buffer);
        &self.buffer
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.header.write_prefix(&mut self.buffer);
        self.buffer
    }
}

pub struct Tuples<'a> {
    page: &'a SlottedPage,
    position: usize,
}

impl<'a> Iterator for Tuples<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let page = self.page;
        let slot = *page.header.used_slots().get(self.position)?;
        self.position += 1;
        Some(&page.buffer[page.header.slot_range(slot)])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.page.header.used_slots().len() - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Tuples<'_> {}

impl<'a> IntoIterator for &'a SlottedPage {
    type Item = &'a [u8];
    type IntoIter = Tuples<'a>;

    fn into_iter(self) -> Tuples<'a> {
        self.iter()
    }
}

#[cfg(test)]
use crate::header::PAGE_SIZE;
#[cfg(test)]
use crate::identifiers::FileId;
#[cfg(test)]
use crate::schema::{FieldType, Value};

#[cfg(test)]
fn employee() -> Schema {
    Schema::new("employee", vec![("id", FieldType::Int), ("age", FieldType::Int)])
        .expect("valid schema")
}

#[cfg(test)]
fn ages(page: &SlottedPage, schema: &Schema) -> Vec<i32> {
    page.iter()
        .map(|bytes| match schema.unpack(bytes).map(|r| r.get("age").cloned()) {
            Ok(Ok(Value::Int(age))) => age,
            other => panic!("undecodable tuple: {:?}", other),
        })
        .collect()
}

#[cfg(test)]
fn pack_employee(schema: &Schema, id: i32, age: i32) -> Vec<u8> {
    let record = schema.instantiate([id, age]).expect("valid record");
    schema.pack(&record).expect("packable record")
}

#[test]
fn fresh_page_is_empty() -> Result<(), PageError> {
    let schema = employee();
    let page = SlottedPage::new(PageId::new(FileId(1), 100), vec![0u8; PAGE_SIZE], &schema)?;
    assert_eq!(page.header().num_tuples(), 0);
    assert_eq!(page.header().used_space(), 0);
    assert_eq!(page.header().tuple_size(), 8);
    assert_eq!(page.iter().count(), 0);
    assert!(!page.is_dirty());
    Ok(())
}

#[test]
fn insert_read_update_and_iterate() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(1), 100);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;

    let e1 = schema.instantiate([1, 25])?;
    let tid = page.insert_tuple(&schema.pack(&e1)?).expect("room for a tuple");
    assert_eq!(tid.tuple_index(), 0);
    assert_eq!(tid.page_id(), page_id);
    assert!(page.is_dirty());

    let e2 = schema.unpack(page.get_tuple(tid).expect("tuple present"))?;
    assert_eq!(e2.to_string(), "employee(id=1, age=25)");

    let e1 = schema.instantiate([1, 28])?;
    assert_eq!(page.put_tuple(tid, &schema.pack(&e1)?), Some(()));
    let e3 = schema.unpack(page.get_tuple(tid).expect("tuple present"))?;
    assert_eq!(e3, e1);
    assert_ne!(e2, e3);
    assert_eq!(page.header().num_tuples(), 1);

    for i in 0..10 {
        assert!(page.insert_tuple(&pack_employee(&schema, i, 2 * i + 20)).is_some());
    }
    assert_eq!(page.header().num_tuples(), 11);
    assert_eq!(
        ages(&page, &schema),
        vec![28, 20, 22, 24, 26, 28, 30, 32, 34, 36, 38]
    );
    Ok(())
}

#[test]
fn scenario_iteration_before_update() -> Result<(), PageError> {
    let schema = employee();
    let mut page = SlottedPage::new(PageId::new(FileId(2), 7), vec![0u8; PAGE_SIZE], &schema)?;
    let first = page.insert_tuple(&pack_employee(&schema, 1, 25)).expect("room");
    for i in 0..10 {
        page.insert_tuple(&pack_employee(&schema, i, 2 * i + 20));
    }
    assert_eq!(
        ages(&page, &schema),
        vec![25, 20, 22, 24, 26, 28, 30, 32, 34, 36, 38]
    );
    page.put_tuple(first, &pack_employee(&schema, 1, 28));
    assert_eq!(&ages(&page, &schema)[..3], &[28, 20, 22]);
    Ok(())
}

#[test]
fn clear_zeroes_but_keeps_tuple() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(1), 100);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    page.insert_tuple(&pack_employee(&schema, 1, 28));
    for i in 0..10 {
        page.insert_tuple(&pack_employee(&schema, i, 2 * i + 20));
    }

    let tid = TupleId::new(page_id, 0);
    let before_clear = page.header().used_space();
    page.set_dirty(false);
    assert_eq!(page.clear_tuple(tid), Some(()));
    assert!(page.is_dirty());
    let cleared = schema.unpack(page.get_tuple(tid).expect("still present"))?;
    assert_eq!(cleared, schema.instantiate([0, 0])?);
    assert_eq!(page.header().used_space(), before_clear);
    assert_eq!(
        ages(&page, &schema),
        vec![0, 20, 22, 24, 26, 28, 30, 32, 34, 36, 38]
    );

    let before_delete = page.header().used_space();
    assert_eq!(page.delete_tuple(tid), Some(()));
    assert_eq!(
        ages(&page, &schema),
        vec![20, 22, 24, 26, 28, 30, 32, 34, 36, 38]
    );
    assert_eq!(
        page.header().used_space(),
        before_delete - page.header().tuple_size()
    );
    Ok(())
}

#[test]
fn delete_compacts_later_tuples() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(3), 1);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    for (id, age) in [(1, 25), (2, 20), (3, 22), (4, 24)] {
        page.insert_tuple(&pack_employee(&schema, id, age));
    }
    let used_before = page.header().used_space();

    assert_eq!(page.delete_tuple(TupleId::new(page_id, 0)), Some(()));
    assert_eq!(ages(&page, &schema), vec![20, 22, 24]);
    assert_eq!(page.header().used_space(), used_before - 8);
    assert_eq!(page.header().used_slots(), &[0, 1, 2]);
    assert_eq!(page.header().next_slot(), Some(3));

    // The old last slot is free and zeroed; the next insert lands there.
    let last = page.header().slot_range(3);
    assert!(page.pack()[last].iter().all(|&b| b == 0));
    let tid = page.insert_tuple(&pack_employee(&schema, 5, 30)).expect("room");
    assert_eq!(tid.tuple_index(), 3);
    assert_eq!(ages(&page, &schema), vec![20, 22, 24, 30]);
    Ok(())
}

#[test]
fn delete_in_the_middle_and_at_the_end() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(3), 2);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    for i in 0..5 {
        page.insert_tuple(&pack_employee(&schema, i, 40 + i));
    }
    page.delete_tuple(TupleId::new(page_id, 2));
    assert_eq!(ages(&page, &schema), vec![40, 41, 43, 44]);
    page.delete_tuple(TupleId::new(page_id, 3));
    assert_eq!(ages(&page, &schema), vec![40, 41, 43]);
    assert_eq!(page.delete_tuple(TupleId::new(page_id, 3)), None);
    assert_eq!(page.header().num_tuples(), 3);
    Ok(())
}

#[test]
fn unoccupied_slots_are_not_found() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(1), 5);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    let tid = page.insert_tuple(&pack_employee(&schema, 1, 2)).expect("room");
    page.set_dirty(false);

    let missing = TupleId::new(page_id, 1);
    assert_eq!(page.get_tuple(missing), None);
    assert_eq!(page.put_tuple(missing, &pack_employee(&schema, 9, 9)), None);
    assert_eq!(page.clear_tuple(missing), None);
    assert_eq!(page.delete_tuple(missing), None);
    assert_eq!(page.get_tuple(TupleId::new(page_id, u16::MAX)), None);
    assert!(!page.is_dirty());

    let foreign = TupleId::new(PageId::new(FileId(1), 6), tid.tuple_index());
    assert_eq!(page.get_tuple(foreign), None);
    assert_eq!(page.delete_tuple(foreign), None);
    assert_eq!(page.header().num_tuples(), 1);
    Ok(())
}

#[test]
fn fills_to_capacity_then_refuses() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(4), 0);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    let expected = page.header().free_space() / page.header().tuple_size();
    assert_eq!(expected, page.header().num_slots());

    let mut inserted = 0;
    while page.header().has_free_tuple() {
        let tid = page.insert_tuple(&pack_employee(&schema, inserted, inserted));
        assert!(tid.is_some());
        inserted += 1;
    }
    assert_eq!(inserted as usize, expected);
    assert_eq!(page.insert_tuple(&pack_employee(&schema, -1, -1)), None);
    assert_eq!(page.iter().len(), expected);
    Ok(())
}

#[test]
fn pack_and_unpack_restore_the_page() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(5), 9);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    for i in 0..6 {
        page.insert_tuple(&pack_employee(&schema, i, 60 - i));
    }
    page.delete_tuple(TupleId::new(page_id, 1));

    let bytes = page.pack().to_vec();
    assert_eq!(bytes.len(), PAGE_SIZE);
    let restored = SlottedPage::unpack(page_id, bytes)?;
    assert_eq!(restored.header(), page.header());
    assert!(restored.is_dirty());
    assert_eq!(ages(&restored, &schema), ages(&page, &schema));
    assert_eq!(ages(&restored, &schema), vec![60, 58, 57, 56, 55]);
    let original: Vec<(TupleId, Vec<u8>)> =
        page.tuples().map(|(id, t)| (id, t.to_vec())).collect();
    let reloaded: Vec<(TupleId, Vec<u8>)> =
        restored.tuples().map(|(id, t)| (id, t.to_vec())).collect();
    assert_eq!(original, reloaded);
    Ok(())
}

#[test]
fn header_changes_reach_the_buffer_only_on_pack() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(5), 10);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    page.insert_tuple(&pack_employee(&schema, 1, 1));
    let bytes = page.clone().into_bytes();
    assert_eq!(&bytes[..page.header().header_size()], page.header().pack().as_slice());

    let header = page.header().clone();
    let rewrapped = SlottedPage::with_header(page_id, bytes, header)?;
    let tid = TupleId::new(page_id, 0);
    assert_eq!(rewrapped.get_tuple(tid), page.get_tuple(tid));
    Ok(())
}

#[test]
fn iteration_follows_insertion_order_until_reload() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(6), 0);
    let mut page = SlottedPage::new(page_id, vec![0u8; 128], &schema)?;
    let n = page.header().num_slots() as i32;
    for i in 0..n {
        page.insert_tuple(&pack_employee(&schema, i, i));
    }
    // Freeing through the header leaves a hole that the next insert refills
    // last in iteration order.
    let mut header = page.header().clone();
    header.free_slot(0);
    let bytes = page.into_bytes();
    let mut page = SlottedPage::with_header(page_id, bytes, header)?;
    page.insert_tuple(&pack_employee(&schema, 99, 99));
    let mut expected: Vec<i32> = (1..n).collect();
    expected.push(99);
    assert_eq!(ages(&page, &schema), expected);

    let reloaded = SlottedPage::unpack(page_id, page.into_bytes())?;
    let mut ascending = vec![99];
    ascending.extend(1..n);
    assert_eq!(ages(&reloaded, &schema), ascending);
    Ok(())
}

#[test]
fn odd_length_tuples_are_padded_or_truncated() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(7), 0);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    let tid = page.insert_tuple(&[0xff; 12]).expect("room");
    assert_eq!(page.get_tuple(tid), Some(&[0xff; 8][..]));
    page.put_tuple(tid, &[7, 7]);
    assert_eq!(page.get_tuple(tid), Some(&[7, 7, 0, 0, 0, 0, 0, 0][..]));
    Ok(())
}

#[test]
fn construction_requires_a_buffer() {
    let schema = employee();
    let page_id = PageId::new(FileId(8), 0);
    assert_eq!(
        SlottedPage::new(page_id, Vec::new(), &schema).unwrap_err(),
        PageError::MissingBuffer
    );
    assert!(matches!(
        SlottedPage::new(page_id, vec![0u8; 4], &schema),
        Err(PageError::BufferTooSmall { .. })
    ));

    let mut big = vec![0u8; PAGE_SIZE];
    let header = SlotHeader::new(&mut big, 8, None).expect("valid header");
    assert!(matches!(
        SlottedPage::with_header(page_id, vec![0u8; 1024], header.clone()),
        Err(PageError::BufferTooSmall { .. })
    ));
    assert_eq!(
        SlottedPage::with_header(page_id, vec![0u8; PAGE_SIZE + 1], header.clone())
            .unwrap_err(),
        PageError::CapacityMismatch {
            len: PAGE_SIZE + 1,
            capacity: PAGE_SIZE
        }
    );
    assert_eq!(
        SlottedPage::with_header(page_id, Vec::new(), header).unwrap_err(),
        PageError::MissingBuffer
    );
    assert!(matches!(
        SlottedPage::unpack(page_id, vec![0u8; PAGE_SIZE]),
        Err(PageError::CorruptedHeader { .. })
    ));
}

#[test]
fn packed_pages_are_exactly_capacity_bytes() -> Result<(), PageError> {
    let schema = employee();
    let page_id = PageId::new(FileId(8), 1);
    let mut big = vec![0u8; PAGE_SIZE];
    let header = SlotHeader::new(&mut big, schema.size(), Some(512))?;
    assert!(matches!(
        SlottedPage::unpack(page_id, big),
        Err(PageError::CapacityMismatch { len: PAGE_SIZE, capacity: 512 })
    ));

    let mut page = SlottedPage::with_header(page_id, vec![0u8; 512], header)?;
    page.insert_tuple(&pack_employee(&schema, 3, 30));
    assert_eq!(page.pack().len(), 512);
    let bytes = page.into_bytes();
    assert_eq!(bytes.len(), 512);
    let restored = SlottedPage::unpack(page_id, bytes)?;
    assert_eq!(ages(&restored, &schema), vec![30]);
    Ok(())
}

#[test]
fn random_deletes_keep_relative_order() -> Result<(), PageError> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let schema = employee();
    let page_id = PageId::new(FileId(9), 0);
    let mut page = SlottedPage::new(page_id, vec![0u8; 1024], &schema)?;
    let mut model = Vec::new();
    let mut next_age = 0;
    for _ in 0..500 {
        if rng.gen_range(0..3) > 0 {
            if page.insert_tuple(&pack_employee(&schema, 0, next_age)).is_some() {
                model.push(next_age);
            }
            next_age += 1;
        } else if !model.is_empty() {
            let victim = rng.gen_range(0..model.len());
            let slot = page.header().used_slots()[victim];
            assert_eq!(page.delete_tuple(TupleId::new(page_id, slot)), Some(()));
            model.remove(victim);
        }
        assert_eq!(ages(&page, &schema), model);
        assert_eq!(page.header().num_tuples(), model.len());
    }
    Ok(())
}

#[test]
fn random_payloads_survive_a_round_trip() -> Result<(), PageError> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let schema = Schema::new("blob", vec![("data", FieldType::Char(24))])?;
    let page_id = PageId::new(FileId(9), 1);
    let mut page = SlottedPage::new(page_id, vec![0u8; PAGE_SIZE], &schema)?;
    let mut written = Vec::new();
    while page.header().has_free_tuple() {
        let mut payload = [0u8; 24];
        rng.fill(&mut payload[..]);
        page.insert_tuple(&payload);
        written.push(payload.to_vec());
    }
    let restored = SlottedPage::unpack(page_id, page.pack().to_vec())?;
    let read: Vec<Vec<u8>> = restored.iter().map(<[u8]>::to_vec).collect();
    assert_eq!(read, written);
    Ok(())
}
