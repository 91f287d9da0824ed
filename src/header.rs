//! Slot header of a slotted page.
//!
//! The header lives in the first bytes of the page it describes:
//!
//! ```text
//! | flags (1) | tuple size (2) | page capacity (2) | num slots (2) | next slot (2) | bitmap ... |
//! ```
//!
//! All numeric fields are little-endian. The bitmap holds one bit per slot,
//! slot `i` in bit `i % 8` of byte `i / 8`. Tuples follow the header, slot `i`
//! at `header_size() + i * tuple_size`.
//!
//! The bitmap is the authoritative record of occupancy. The used and free
//! orderings are kept next to it so that allocation is FIFO over free slots
//! and iteration follows insertion order; every method that touches one of
//! them updates all three.

use crate::errors::PageError;
use crate::types::{o16, read_le, write_le};
use std::collections::VecDeque;
use std::ops::Range;

pub const PAGE_SIZE: usize = 4096;

const SIZE_FLAGS: usize = size_of::<u8>();
const SIZE_TUPLE_SIZE: usize = size_of::<u16>();
const SIZE_PAGE_CAPACITY: usize = size_of::<u16>();
const SIZE_NUM_OF_SLOTS: usize = size_of::<u16>();
const SIZE_NEXT_SLOT: usize = size_of::<u16>();

/// Size of the numeric part of the header, before the bitmap.
pub const FIXED_PREFIX: usize =
    SIZE_FLAGS + SIZE_TUPLE_SIZE + SIZE_PAGE_CAPACITY + SIZE_NUM_OF_SLOTS + SIZE_NEXT_SLOT;

const OFFSET_FLAGS: usize = 0;
const OFFSET_TUPLE_SIZE: usize = OFFSET_FLAGS + SIZE_FLAGS;
const OFFSET_PAGE_CAPACITY: usize = OFFSET_TUPLE_SIZE + SIZE_TUPLE_SIZE;
const OFFSET_NUM_OF_SLOTS: usize = OFFSET_PAGE_CAPACITY + SIZE_PAGE_CAPACITY;
const OFFSET_NEXT_SLOT: usize = OFFSET_NUM_OF_SLOTS + SIZE_NUM_OF_SLOTS;
const OFFSET_BITMAP: usize = OFFSET_NEXT_SLOT + SIZE_NEXT_SLOT;

/// Stored in the next-slot field when every slot is taken.
pub const NO_SLOT: u16 = u16::MAX;

const DIRTY_MASK: u8 = 0b1;

#[derive(Debug, Clone)]
pub struct SlotHeader {
    flags: u8,
    tuple_size: o16,
    page_capacity: o16,
    num_slots: o16,
    next_slot: o16,
    bitmap: Vec<u8>,
    used: Vec<u16>,
    free: VecDeque<u16>,
}

impl SlotHeader {
    /// Creates a header with every slot free and writes it into the front of
    /// `buffer`. The page capacity defaults to the buffer length.
    pub fn new(
        buffer: &mut [u8],
        tuple_size: usize,
        page_capacity: Option<usize>,
    ) -> Result<Self, PageError> {
        if buffer.is_empty() {
            return Err(PageError::MissingBuffer);
        }
        if buffer.len() < FIXED_PREFIX {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: FIXED_PREFIX,
            });
        }
        if tuple_size == 0 {
            return Err(PageError::InvalidTupleSize);
        }
        let capacity = page_capacity.unwrap_or(buffer.len());
        if capacity < FIXED_PREFIX {
            return Err(PageError::InvalidPageCapacity { capacity });
        }
        if capacity > buffer.len() {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: capacity,
            });
        }

        let slots = Self::slots_for(capacity, tuple_size);
        let mut header = Self {
            flags: 0,
            tuple_size: tuple_size.try_into()?,
            page_capacity: capacity.try_into()?,
            num_slots: slots.try_into()?,
            next_slot: o16(NO_SLOT),
            bitmap: vec![0u8; slots.div_ceil(8)],
            used: Vec::with_capacity(slots),
            free: VecDeque::with_capacity(slots),
        };
        header.rebuild_orderings();
        header.write_prefix(buffer);

        tracing::debug!(
            target: "slotpage::header",
            tuple_size,
            page_capacity = capacity,
            num_slots = slots,
            "initialized slot header"
        );
        Ok(header)
    }

    /// Largest slot count whose tuples and bitmap bits fit beside the fixed prefix:
    /// `floor((capacity - FIXED_PREFIX) / (tuple_size + 1/8))`.
    fn slots_for(capacity: usize, tuple_size: usize) -> usize {
        8 * (capacity - FIXED_PREFIX) / (8 * tuple_size + 1)
    }

    pub fn header_size(&self) -> usize {
        FIXED_PREFIX + self.bitmap.len()
    }

    pub fn tuple_size(&self) -> usize {
        self.tuple_size.as_usize()
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity.as_usize()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots.as_usize()
    }

    /// The slot the next allocation hands out, if any is free.
    pub fn next_slot(&self) -> Option<u16> {
        (self.next_slot.0 != NO_SLOT).then_some(self.next_slot.0)
    }

    pub fn free_space(&self) -> usize {
        self.page_capacity() - self.header_size() - self.used_space()
    }

    pub fn used_space(&self) -> usize {
        self.used.len() * self.tuple_size()
    }

    pub fn num_tuples(&self) -> usize {
        self.used_space() / self.tuple_size()
    }

    pub fn has_free_tuple(&self) -> bool {
        self.free_space() >= self.tuple_size() && !self.free.is_empty()
    }

    /// Occupied slots, oldest allocation first.
    pub fn used_slots(&self) -> &[u16] {
        &self.used
    }

    /// Free slots in the order they will be allocated.
    pub fn free_slots(&self) -> impl Iterator<Item = u16> + '_ {
        self.free.iter().copied()
    }

    pub fn has_slot(&self, slot: u16) -> bool {
        (slot as usize) < self.num_slots() && self.bit(slot)
    }

    pub fn is_occupied(&self, slot: u16) -> bool {
        self.has_slot(slot)
    }

    pub fn slot_offset(&self, slot: u16) -> usize {
        self.header_size() + slot as usize * self.tuple_size()
    }

    pub fn slot_range(&self, slot: u16) -> Range<usize> {
        let start = self.slot_offset(slot);
        start..start + self.tuple_size()
    }

    /// Byte range covering every slot, used or not.
    pub fn tuple_region(&self) -> Range<usize> {
        self.header_size()..self.header_size() + self.num_slots() * self.tuple_size()
    }

    /// Takes the oldest free slot. Returns `None` once the page is full.
    pub fn allocate_slot(&mut self) -> Option<u16> {
        if !self.has_free_tuple() {
            return None;
        }
        let slot = self.free.pop_front()?;
        self.set_bit(slot, true);
        self.used.push(slot);
        self.sync_next_slot();
        tracing::trace!(target: "slotpage::header", slot, "allocated slot");
        Some(slot)
    }

    /// Allocates a slot and returns it with the byte range its tuple occupies.
    pub fn allocate_range(&mut self) -> Option<(u16, usize, usize)> {
        let slot = self.allocate_slot()?;
        let range = self.slot_range(slot);
        Some((slot, range.start, range.end))
    }

    /// Returns an occupied slot to the back of the free queue. Does nothing
    /// and returns `false` if the slot is not occupied.
    pub fn free_slot(&mut self, slot: u16) -> bool {
        if !self.has_slot(slot) {
            return false;
        }
        self.set_bit(slot, false);
        if let Some(position) = self.used.iter().position(|&s| s == slot) {
            self.used.remove(position);
        }
        self.free.push_back(slot);
        self.sync_next_slot();
        tracing::trace!(target: "slotpage::header", slot, "freed slot");
        true
    }

    /// Frees `slot` and moves the occupancy of every later slot down by one,
    /// mirroring a page that shifted its tuples to close the hole. The used and
    /// free orderings are rebuilt in ascending order.
    pub(crate) fn remove_and_compact(&mut self, slot: u16) -> bool {
        if !self.has_slot(slot) {
            return false;
        }
        let last = self.num_slots() - 1;
        for i in slot as usize..last {
            let next = self.bit(i as u16 + 1);
            self.set_bit(i as u16, next);
        }
        self.set_bit(last as u16, false);
        self.rebuild_orderings();
        tracing::trace!(
            target: "slotpage::header",
            slot,
            used = self.used.len(),
            "compacted slots after removal"
        );
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.flags & DIRTY_MASK != 0
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty {
            self.flags |= DIRTY_MASK;
        } else {
            self.flags &= !DIRTY_MASK;
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut packed = vec![0u8; self.header_size()];
        self.write_prefix(&mut packed);
        packed
    }

    pub fn pack_into(&self, buffer: &mut [u8]) -> Result<(), PageError> {
        if buffer.len() < self.header_size() {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: self.header_size(),
            });
        }
        self.write_prefix(buffer);
        Ok(())
    }

    /// Callers guarantee `buffer` holds at least `header_size()` bytes.
    pub(crate) fn write_prefix(&self, buffer: &mut [u8]) {
        write_le::<u8, SIZE_FLAGS>(buffer, OFFSET_FLAGS, self.flags);
        write_le::<o16, SIZE_TUPLE_SIZE>(buffer, OFFSET_TUPLE_SIZE, self.tuple_size);
        write_le::<o16, SIZE_PAGE_CAPACITY>(buffer, OFFSET_PAGE_CAPACITY, self.page_capacity);
        write_le::<o16, SIZE_NUM_OF_SLOTS>(buffer, OFFSET_NUM_OF_SLOTS, self.num_slots);
        write_le::<o16, SIZE_NEXT_SLOT>(buffer, OFFSET_NEXT_SLOT, self.next_slot);
        buffer[OFFSET_BITMAP..self.header_size()].copy_from_slice(&self.bitmap);
    }

    /// Rebuilds a header from the front of `buffer`. The slot count is taken
    /// from the stored field, not recomputed. Used and free slots come back in
    /// ascending order; insertion order does not survive a round trip.
    pub fn unpack(buffer: &[u8]) -> Result<Self, PageError> {
        if buffer.is_empty() {
            return Err(PageError::MissingBuffer);
        }
        if buffer.len() < FIXED_PREFIX {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: FIXED_PREFIX,
            });
        }

        let flags = read_le::<u8, SIZE_FLAGS>(buffer, OFFSET_FLAGS);
        let tuple_size = read_le::<o16, SIZE_TUPLE_SIZE>(buffer, OFFSET_TUPLE_SIZE);
        let page_capacity = read_le::<o16, SIZE_PAGE_CAPACITY>(buffer, OFFSET_PAGE_CAPACITY);
        let num_slots = read_le::<o16, SIZE_NUM_OF_SLOTS>(buffer, OFFSET_NUM_OF_SLOTS);
        let stored_next = read_le::<o16, SIZE_NEXT_SLOT>(buffer, OFFSET_NEXT_SLOT);

        if tuple_size.0 == 0 {
            return Err(PageError::CorruptedHeader {
                reason: "tuple size is zero".to_string(),
            });
        }
        let slots = num_slots.as_usize();
        let header_size = FIXED_PREFIX + slots.div_ceil(8);
        if header_size + slots * tuple_size.as_usize() > page_capacity.as_usize() {
            return Err(PageError::CorruptedHeader {
                reason: format!(
                    "{} slots of {} bytes do not fit in a {} byte page",
                    slots,
                    tuple_size.0,
                    page_capacity.0
                ),
            });
        }
        if buffer.len() < header_size {
            return Err(PageError::BufferTooSmall {
                len: buffer.len(),
                required: header_size,
            });
        }

        let mut bitmap = buffer[OFFSET_BITMAP..header_size].to_vec();
        if slots % 8 != 0 {
            if let Some(last) = bitmap.last_mut() {
                *last &= (1u8 << (slots % 8)) - 1;
            }
        }

        let mut header = Self {
            flags,
            tuple_size,
            page_capacity,
            num_slots,
            next_slot: o16(NO_SLOT),
            bitmap,
            used: Vec::with_capacity(slots),
            free: VecDeque::with_capacity(slots),
        };
        header.rebuild_orderings();

        // Keep the stored allocation cursor when it still names a free slot.
        if let Some(position) = header.free.iter().position(|&s| s == stored_next.0) {
            if position != 0 {
                header.free.remove(position);
                header.free.push_front(stored_next.0);
                header.sync_next_slot();
            }
        }

        tracing::debug!(
            target: "slotpage::header",
            tuple_size = tuple_size.0,
            page_capacity = page_capacity.0,
            num_slots = slots,
            used = header.used.len(),
            "unpacked slot header"
        );
        Ok(header)
    }

    fn bit(&self, slot: u16) -> bool {
        let slot = slot as usize;
        (self.bitmap[slot / 8] >> (slot % 8)) & 1 == 1
    }

    fn set_bit(&mut self, slot: u16, occupied: bool) {
        let slot = slot as usize;
        if occupied {
            self.bitmap[slot / 8] |= 1 << (slot % 8);
        } else {
            self.bitmap[slot / 8] &= !(1 << (slot % 8));
        }
    }

    fn rebuild_orderings(&mut self) {
        self.used.clear();
        self.free.clear();
        for slot in 0..self.num_slots.0 {
            if self.bit(slot) {
                self.used.push(slot);
            } else {
                self.free.push_back(slot);
            }
        }
        self.sync_next_slot();
    }

    fn sync_next_slot(&mut self) {
        self.next_slot = o16(self.free.front().copied().unwrap_or(NO_SLOT));
    }
}

impl PartialEq for SlotHeader {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.tuple_size == other.tuple_size
            && self.page_capacity == other.page_capacity
            && self.num_slots == other.num_slots
            && self.bitmap == other.bitmap
            && self.next_slot == other.next_slot
    }
}

impl Eq for SlotHeader {}

#[cfg(test)]
fn assert_partition(header: &SlotHeader) {
    let mut seen = vec![false; header.num_slots()];
    for &slot in header.used_slots() {
        assert!(!seen[slot as usize], "slot {} listed twice", slot);
        assert!(header.has_slot(slot));
        seen[slot as usize] = true;
    }
    for slot in header.free_slots() {
        assert!(!seen[slot as usize], "slot {} listed twice", slot);
        assert!(!header.has_slot(slot));
        seen[slot as usize] = true;
    }
    assert!(seen.iter().all(|&s| s), "a slot is neither used nor free");
    assert_eq!(header.next_slot(), header.free_slots().next());
}

#[test]
fn dirty_bit_toggles() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    assert!(!header.is_dirty());
    header.set_dirty(true);
    assert!(header.is_dirty());
    header.set_dirty(false);
    assert!(!header.is_dirty());
    Ok(())
}

#[test]
fn allocation_hands_out_slots_in_order_until_full() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;

    assert!(header.has_free_tuple());
    assert_eq!(header.allocate_slot(), Some(0));
    assert_eq!(header.num_tuples(), 1);

    let allocated: Vec<u16> = (0..10).filter_map(|_| header.allocate_slot()).collect();
    assert_eq!(allocated, (1..=10).collect::<Vec<u16>>());
    assert_eq!(header.num_tuples(), 11);
    assert!(header.has_free_tuple());

    assert_eq!(header.used_space(), 11 * header.tuple_size());
    assert_eq!(
        header.free_space(),
        PAGE_SIZE - (header.header_size() + 11 * header.tuple_size())
    );

    let remaining = header.free_space() / header.tuple_size();
    let rest: Vec<u16> = (0..remaining).filter_map(|_| header.allocate_slot()).collect();
    assert_eq!(rest.len(), remaining);
    assert_eq!(rest[0], 11);
    assert_eq!(rest[1], 12);

    assert!(!header.has_free_tuple());
    assert_eq!(header.allocate_slot(), None);
    assert!(header.free_space() < header.tuple_size());
    assert_eq!(header.next_slot(), None);
    assert_partition(&header);
    Ok(())
}

#[test]
fn header_size_covers_bitmap() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let header = SlotHeader::new(&mut buffer, 16, None)?;
    // floor(8 * 4087 / 129) slots, one bitmap bit each.
    assert_eq!(header.num_slots(), 253);
    assert_eq!(header.header_size(), FIXED_PREFIX + 32);
    assert_eq!(header.free_space(), PAGE_SIZE - header.header_size());
    assert_eq!(header.used_space(), 0);
    Ok(())
}

#[test]
fn slot_count_fits_and_one_more_would_not() -> Result<(), PageError> {
    for capacity in [64usize, 100, 512, 1000, 4096, 8192, 65_535] {
        for tuple_size in [1usize, 2, 3, 7, 8, 9, 16, 31, 64, 100, 255] {
            let mut buffer = vec![0u8; capacity];
            let header = SlotHeader::new(&mut buffer, tuple_size, None)?;
            let n = header.num_slots();
            assert!(header.header_size() + n * tuple_size <= capacity);
            let grown = FIXED_PREFIX + (n + 1).div_ceil(8) + (n + 1) * tuple_size;
            assert!(grown > capacity, "capacity {} tuple {}", capacity, tuple_size);
        }
    }
    Ok(())
}

#[test]
fn tuple_larger_than_page_leaves_no_slots() -> Result<(), PageError> {
    let mut buffer = vec![0u8; 64];
    let mut header = SlotHeader::new(&mut buffer, 100, None)?;
    assert_eq!(header.num_slots(), 0);
    assert_eq!(header.header_size(), FIXED_PREFIX);
    assert!(!header.has_free_tuple());
    assert_eq!(header.allocate_range(), None);
    Ok(())
}

#[test]
fn allocated_ranges_follow_the_header() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    let base = header.header_size();
    assert_eq!(header.allocate_range(), Some((0, base, base + 16)));
    assert_eq!(header.allocate_range(), Some((1, base + 16, base + 32)));
    header.free_slot(0);
    while let Some((slot, start, end)) = header.allocate_range() {
        assert_eq!(start, header.header_size() + slot as usize * header.tuple_size());
        assert_eq!(end - start, header.tuple_size());
        assert!(end <= header.page_capacity());
        assert!(header.has_slot(slot));
    }
    assert_eq!(header.num_tuples(), header.num_slots());
    Ok(())
}

#[test]
fn construction_rejects_bad_arguments() {
    let mut empty: Vec<u8> = Vec::new();
    assert_eq!(
        SlotHeader::new(&mut empty, 8, None).unwrap_err(),
        PageError::MissingBuffer
    );

    let mut tiny = vec![0u8; FIXED_PREFIX - 1];
    assert_eq!(
        SlotHeader::new(&mut tiny, 8, None).unwrap_err(),
        PageError::BufferTooSmall {
            len: FIXED_PREFIX - 1,
            required: FIXED_PREFIX
        }
    );

    let mut buffer = vec![0u8; PAGE_SIZE];
    assert_eq!(
        SlotHeader::new(&mut buffer, 0, None).unwrap_err(),
        PageError::InvalidTupleSize
    );
    assert_eq!(
        SlotHeader::new(&mut buffer, 8, Some(0)).unwrap_err(),
        PageError::InvalidPageCapacity { capacity: 0 }
    );
    assert_eq!(
        SlotHeader::new(&mut buffer, 8, Some(PAGE_SIZE + 1)).unwrap_err(),
        PageError::BufferTooSmall {
            len: PAGE_SIZE,
            required: PAGE_SIZE + 1
        }
    );

    let mut huge = vec![0u8; 70_000];
    assert!(matches!(
        SlotHeader::new(&mut huge, 8, None),
        Err(PageError::Offset(_))
    ));
}

#[test]
fn explicit_capacity_uses_only_a_prefix_of_the_buffer() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let header = SlotHeader::new(&mut buffer, 8, Some(1024))?;
    assert_eq!(header.page_capacity(), 1024);
    assert!(header.tuple_region().end <= 1024);
    Ok(())
}

#[test]
fn new_writes_packed_form_into_buffer() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let header = SlotHeader::new(&mut buffer, 16, None)?;
    let packed = header.pack();
    assert_eq!(packed.len(), header.header_size());
    assert_eq!(&buffer[..packed.len()], packed.as_slice());

    assert_eq!(buffer[OFFSET_FLAGS], 0);
    assert_eq!(&buffer[OFFSET_TUPLE_SIZE..OFFSET_TUPLE_SIZE + 2], &16u16.to_le_bytes());
    assert_eq!(&buffer[OFFSET_PAGE_CAPACITY..OFFSET_PAGE_CAPACITY + 2], &4096u16.to_le_bytes());
    assert_eq!(&buffer[OFFSET_NUM_OF_SLOTS..OFFSET_NUM_OF_SLOTS + 2], &253u16.to_le_bytes());
    assert_eq!(&buffer[OFFSET_NEXT_SLOT..OFFSET_NEXT_SLOT + 2], &0u16.to_le_bytes());
    Ok(())
}

#[test]
fn bitmap_is_packed_lsb_first() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    for _ in 0..10 {
        header.allocate_slot();
    }
    header.free_slot(1);
    let packed = header.pack();
    assert_eq!(packed[OFFSET_BITMAP], 0b1111_1101);
    assert_eq!(packed[OFFSET_BITMAP + 1], 0b0000_0011);
    assert_eq!(packed[OFFSET_BITMAP + 2], 0);
    Ok(())
}

#[test]
fn unpack_restores_packed_header() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    let fresh = SlotHeader::unpack(&buffer)?;
    assert_eq!(fresh, header);

    for _ in 0..20 {
        header.allocate_slot();
    }
    header.free_slot(4);
    header.free_slot(17);
    header.set_dirty(true);
    header.pack_into(&mut buffer)?;

    let restored = SlotHeader::unpack(&buffer)?;
    assert_eq!(restored, header);
    assert_eq!(restored.num_slots(), header.num_slots());
    assert_eq!(restored.next_slot(), header.next_slot());
    assert!(restored.is_dirty());
    assert_eq!(restored.tuple_size(), 16);
    assert_eq!(restored.page_capacity(), PAGE_SIZE);
    assert_eq!(restored.num_tuples(), 18);
    assert!(!restored.has_slot(4));
    assert!(!restored.has_slot(17));
    assert!(restored.has_slot(5));
    assert_partition(&restored);

    let header_only = SlotHeader::unpack(&header.pack())?;
    assert_eq!(header_only, header);
    Ok(())
}

#[test]
fn unpack_orders_used_slots_ascending() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 64, None)?;
    let n = header.num_slots();
    while header.allocate_slot().is_some() {}
    header.free_slot(2);
    assert_eq!(header.allocate_slot(), Some(2));
    assert_eq!(header.used_slots().last(), Some(&2));

    let restored = SlotHeader::unpack(&header.pack())?;
    let ascending: Vec<u16> = (0..n as u16).collect();
    assert_eq!(restored.used_slots(), ascending.as_slice());
    Ok(())
}

#[test]
fn unpack_keeps_stored_next_slot_at_front() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 512, None)?;
    let n = header.num_slots() as u16;
    while header.allocate_slot().is_some() {}
    header.free_slot(5);
    header.free_slot(1);
    assert_eq!(header.next_slot(), Some(5));

    let mut restored = SlotHeader::unpack(&header.pack())?;
    assert_eq!(restored.next_slot(), Some(5));
    assert_eq!(restored.free_slots().collect::<Vec<_>>(), vec![5, 1]);
    assert_eq!(restored.allocate_slot(), Some(5));
    assert_eq!(restored.allocate_slot(), Some(1));
    assert_eq!(restored.allocate_slot(), None);
    assert_eq!(restored.num_tuples(), n as usize);
    Ok(())
}

#[test]
fn unpack_drops_bitmap_bits_past_the_last_slot() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    // 253 slots: the last bitmap byte only uses its low five bits.
    assert_eq!(header.num_slots() % 8, 5);
    for _ in 0..3 {
        header.allocate_slot();
    }
    let mut bytes = header.pack();
    let last = header.header_size() - 1;
    bytes[last] |= 0b1110_0000;

    let restored = SlotHeader::unpack(&bytes)?;
    assert_eq!(restored.num_tuples(), 3);
    assert_eq!(restored.free_slots().count(), header.num_slots() - 3);
    assert_eq!(restored.pack()[last], 0);
    assert_eq!(restored, header);
    assert_partition(&restored);
    Ok(())
}

#[test]
fn unpack_rejects_impossible_geometry() {
    let mut bytes = vec![0u8; PAGE_SIZE];
    write_le::<o16, SIZE_TUPLE_SIZE>(&mut bytes, OFFSET_TUPLE_SIZE, o16(8));
    write_le::<o16, SIZE_PAGE_CAPACITY>(&mut bytes, OFFSET_PAGE_CAPACITY, o16(4096));
    write_le::<o16, SIZE_NUM_OF_SLOTS>(&mut bytes, OFFSET_NUM_OF_SLOTS, o16(600));
    assert!(matches!(
        SlotHeader::unpack(&bytes),
        Err(PageError::CorruptedHeader { .. })
    ));

    assert!(matches!(
        SlotHeader::unpack(&[0u8; PAGE_SIZE]),
        Err(PageError::CorruptedHeader { .. })
    ));
    assert_eq!(SlotHeader::unpack(&[]).unwrap_err(), PageError::MissingBuffer);
    assert!(matches!(
        SlotHeader::unpack(&[0u8; 4]),
        Err(PageError::BufferTooSmall { .. })
    ));
}

#[test]
fn freed_slots_are_reused_oldest_first() -> Result<(), PageError> {
    let mut buffer = vec![0u8; 256];
    let mut header = SlotHeader::new(&mut buffer, 32, None)?;
    let n = header.num_slots() as u16;
    while header.allocate_slot().is_some() {}
    assert!(header.free_slot(3));
    assert!(header.free_slot(0));
    assert!(!header.free_slot(0));
    assert!(!header.free_slot(n));
    assert_eq!(header.allocate_slot(), Some(3));
    assert_eq!(header.allocate_slot(), Some(0));
    assert_partition(&header);
    Ok(())
}

#[test]
fn compaction_shifts_occupancy_down() -> Result<(), PageError> {
    let mut buffer = vec![0u8; PAGE_SIZE];
    let mut header = SlotHeader::new(&mut buffer, 16, None)?;
    for _ in 0..6 {
        header.allocate_slot();
    }
    header.free_slot(4);
    assert!(header.remove_and_compact(1));
    // 0 1 2 3 _ 5  ->  0 2 3 _ 5 shifted  ->  0 1 2 _ 4
    assert_eq!(header.used_slots(), &[0, 1, 2, 4]);
    assert_eq!(header.next_slot(), Some(3));
    assert!(!header.remove_and_compact(3));
    assert_partition(&header);
    Ok(())
}

#[test]
fn random_operations_keep_occupancy_partitioned() -> Result<(), PageError> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut buffer = vec![0u8; 1024];
    let mut header = SlotHeader::new(&mut buffer, 12, None)?;
    let n = header.num_slots() as u16;
    for _ in 0..2_000 {
        match rng.gen_range(0..3) {
            0 => {
                header.allocate_slot();
            }
            1 => {
                header.free_slot(rng.gen_range(0..n));
            }
            _ => {
                header.remove_and_compact(rng.gen_range(0..n));
            }
        }
        assert_partition(&header);
        assert_eq!(header.num_tuples(), header.used_slots().len());
    }
    let restored = SlotHeader::unpack(&header.pack())?;
    assert_eq!(restored, header);
    Ok(())
}
