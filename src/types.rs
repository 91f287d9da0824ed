use crate::errors::InvalidPageOffsetError;

/// A 16-bit quantity stored inside a page: sizes, slot counts and slot indices.
#[allow(non_camel_case_types)]
pub type o16 = OffsetType<u16>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, Default)]
pub struct OffsetType<T>(pub T);

pub const fn o16(value: u16) -> o16 {
    OffsetType(value)
}

impl o16 {
    pub const MAX: o16 = o16(u16::MAX);

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl<T> TryFrom<usize> for OffsetType<T>
where
    T: TryFrom<usize>,
{
    type Error = InvalidPageOffsetError;

    fn try_from(value: usize) -> Result<Self, InvalidPageOffsetError> {
        T::try_from(value)
            .map(OffsetType)
            .map_err(|_| InvalidPageOffsetError::OutOfRange)
    }
}

pub(crate) trait ToLeBytes<const N: usize> {
    fn to_le(self) -> [u8; N];
}

pub(crate) trait FromLeBytes<const N: usize> {
    fn from_le(bytes: [u8; N]) -> Self;
}

impl ToLeBytes<1> for u8 {
    fn to_le(self) -> [u8; 1] {
        self.to_le_bytes()
    }
}

impl FromLeBytes<1> for u8 {
    fn from_le(bytes: [u8; 1]) -> u8 {
        u8::from_le_bytes(bytes)
    }
}

impl ToLeBytes<2> for o16 {
    fn to_le(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl FromLeBytes<2> for o16 {
    fn from_le(bytes: [u8; 2]) -> o16 {
        OffsetType(u16::from_le_bytes(bytes))
    }
}

/// Reads a little-endian value of `N` bytes at `offset`.
pub(crate) fn read_le<T: FromLeBytes<N>, const N: usize>(buf: &[u8], offset: usize) -> T {
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[offset..offset + N]);
    T::from_le(arr)
}

pub(crate) fn write_le<T: ToLeBytes<N>, const N: usize>(buf: &mut [u8], offset: usize, value: T) {
    buf[offset..offset + N].copy_from_slice(&value.to_le());
}

#[test]
fn o16_conversion_rejects_values_above_u16() {
    assert_eq!(o16::try_from(4096usize), Ok(o16(4096)));
    assert_eq!(o16::try_from(65_535usize), Ok(o16::MAX));
    assert_eq!(
        o16::try_from(65_536usize),
        Err(InvalidPageOffsetError::OutOfRange)
    );
}

#[test]
fn le_helpers_write_least_significant_byte_first() {
    let mut buf = [0u8; 4];
    write_le::<o16, 2>(&mut buf, 1, o16(0x1234));
    assert_eq!(buf, [0x00, 0x34, 0x12, 0x00]);
    let back = read_le::<o16, 2>(&buf, 1);
    assert_eq!(back, o16(0x1234));
}
