//! Typed views over shared buffers.

use super::SharedBuffer;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{
    AtomicI8, AtomicI16, AtomicI32, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering,
};

/// Element type of a [`TypedView`].
///
/// The discriminants are the element tags used by the argument wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ElementType {
    /// Signed 8-bit integer.
    Int8 = 2,
    /// Unsigned 8-bit integer.
    Uint8 = 3,
    /// Unsigned 8-bit integer, stores clamp to 0..=255.
    Uint8Clamped = 4,
    /// Signed 16-bit integer.
    Int16 = 5,
    /// Unsigned 16-bit integer.
    Uint16 = 6,
    /// Signed 32-bit integer.
    Int32 = 7,
    /// Unsigned 32-bit integer.
    Uint32 = 8,
    /// 32-bit float.
    Float32 = 9,
    /// 64-bit float.
    Float64 = 10,
}

impl ElementType {
    /// All element types, in tag order.
    pub const ALL: [ElementType; 9] = [
        ElementType::Int8,
        ElementType::Uint8,
        ElementType::Uint8Clamped,
        ElementType::Int16,
        ElementType::Uint16,
        ElementType::Int32,
        ElementType::Uint32,
        ElementType::Float32,
        ElementType::Float64,
    ];

    /// Size of one element in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            ElementType::Int8 | ElementType::Uint8 | ElementType::Uint8Clamped => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Float64 => 8,
        }
    }

    /// Wire tag.
    #[inline]
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Look up an element type by wire tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::Uint8 => "uint8",
            ElementType::Uint8Clamped => "uint8-clamped",
            ElementType::Int16 => "int16",
            ElementType::Uint16 => "uint16",
            ElementType::Int32 => "int32",
            ElementType::Uint32 => "uint32",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wrap a number to 32 bits the way integer element stores do.
fn wrap_to_u32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4_294_967_296.0) as u32
}

fn clamp_to_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0).round_ties_even() as u8
}

/// A window of `len` elements of one type over a [`SharedBuffer`].
///
/// Views are cheap to clone and keep the buffer alive. Several views with
/// different element types may alias the same bytes.
#[derive(Clone)]
pub struct TypedView {
    buffer: SharedBuffer,
    element_type: ElementType,
    byte_offset: usize,
    len: usize,
}

impl TypedView {
    /// Create a view of `len` elements starting at `byte_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidView`] if the offset is not a multiple of the
    /// element size or the view runs past the end of the buffer.
    pub fn new(
        buffer: SharedBuffer,
        element_type: ElementType,
        byte_offset: usize,
        len: usize,
    ) -> Result<Self> {
        let size = element_type.size();
        if byte_offset % size != 0 {
            return Err(Error::InvalidView(format!(
                "byte offset {byte_offset} is not aligned for {element_type}"
            )));
        }
        let end = len
            .checked_mul(size)
            .and_then(|bytes| bytes.checked_add(byte_offset))
            .ok_or_else(|| Error::InvalidView(format!("{len} elements overflow")))?;
        if end > buffer.byte_len() {
            return Err(Error::InvalidView(format!(
                "{len} {element_type} elements at {byte_offset} exceed buffer of {} bytes",
                buffer.byte_len()
            )));
        }
        Ok(Self {
            buffer,
            element_type,
            byte_offset,
            len,
        })
    }

    /// A view covering the whole buffer.
    pub fn whole(buffer: SharedBuffer, element_type: ElementType) -> Self {
        let len = buffer.byte_len() / element_type.size();
        Self {
            buffer,
            element_type,
            byte_offset: 0,
            len,
        }
    }

    /// A narrower view of `len` elements starting at element `start`.
    pub fn subview(&self, start: usize, len: usize) -> Result<Self> {
        let offset = start
            .checked_mul(self.element_type.size())
            .and_then(|bytes| bytes.checked_add(self.byte_offset))
            .ok_or_else(|| Error::InvalidView(format!("start {start} overflows")))?;
        Self::new(self.buffer.clone(), self.element_type, offset, len)
    }

    /// The buffer this view is over.
    #[inline]
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Element type.
    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Offset of the first element in the buffer, in bytes.
    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the view has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len * self.element_type.size()
    }

    /// Do both views cover the same bytes with the same type?
    pub fn same_view(&self, other: &TypedView) -> bool {
        self.buffer.same_buffer(&other.buffer)
            && self.element_type == other.element_type
            && self.byte_offset == other.byte_offset
            && self.len == other.len
    }

    /// Reinterpret the elements as atomics of type `A`.
    ///
    /// # Safety
    ///
    /// `A` must have size and alignment equal to the element size.
    unsafe fn cells<A>(&self) -> &[A] {
        // SAFETY: bounds and alignment were checked at construction, and the
        // buffer outlives `self`.
        unsafe {
            std::slice::from_raw_parts(
                self.buffer.as_ptr().add(self.byte_offset).cast::<A>(),
                self.len,
            )
        }
    }

    /// Int8 elements.
    pub fn as_i8(&self) -> Option<&[AtomicI8]> {
        (self.element_type == ElementType::Int8).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Uint8 or Uint8Clamped elements.
    pub fn as_u8(&self) -> Option<&[AtomicU8]> {
        matches!(
            self.element_type,
            ElementType::Uint8 | ElementType::Uint8Clamped
        )
        .then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Int16 elements.
    pub fn as_i16(&self) -> Option<&[AtomicI16]> {
        (self.element_type == ElementType::Int16).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Uint16 elements.
    pub fn as_u16(&self) -> Option<&[AtomicU16]> {
        (self.element_type == ElementType::Uint16).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Int32 elements.
    pub fn as_i32(&self) -> Option<&[AtomicI32]> {
        (self.element_type == ElementType::Int32).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Uint32 elements.
    pub fn as_u32(&self) -> Option<&[AtomicU32]> {
        (self.element_type == ElementType::Uint32).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Float32 elements as their bit patterns.
    pub fn as_f32_bits(&self) -> Option<&[AtomicU32]> {
        (self.element_type == ElementType::Float32).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Float64 elements as their bit patterns.
    pub fn as_f64_bits(&self) -> Option<&[AtomicU64]> {
        (self.element_type == ElementType::Float64).then(|| {
            // SAFETY: the element type was just checked, so the atomic width matches.
            unsafe { self.cells() }
        })
    }

    /// Read element `index` as a number.
    ///
    /// Returns `None` if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Option<f64> {
        if index >= self.len {
            return None;
        }
        let order = Ordering::Relaxed;
        // SAFETY: the element type selects the matching cell width.
        let value = unsafe {
            match self.element_type {
                ElementType::Int8 => self.cells::<AtomicI8>()[index].load(order) as f64,
                ElementType::Uint8 | ElementType::Uint8Clamped => {
                    self.cells::<AtomicU8>()[index].load(order) as f64
                }
                ElementType::Int16 => self.cells::<AtomicI16>()[index].load(order) as f64,
                ElementType::Uint16 => self.cells::<AtomicU16>()[index].load(order) as f64,
                ElementType::Int32 => self.cells::<AtomicI32>()[index].load(order) as f64,
                ElementType::Uint32 => self.cells::<AtomicU32>()[index].load(order) as f64,
                ElementType::Float32 => {
                    f32::from_bits(self.cells::<AtomicU32>()[index].load(order)) as f64
                }
                ElementType::Float64 => f64::from_bits(self.cells::<AtomicU64>()[index].load(order)),
            }
        };
        Some(value)
    }

    /// Store `value` into element `index`, converting it to the element type.
    ///
    /// Integer types wrap modulo their width, `Uint8Clamped` clamps and rounds
    /// half to even. Returns false if `index` is out of bounds.
    pub fn set(&self, index: usize, value: f64) -> bool {
        if index >= self.len {
            return false;
        }
        let order = Ordering::Relaxed;
        let bits = wrap_to_u32(value);
        // SAFETY: as in `get`.
        unsafe {
            match self.element_type {
                ElementType::Int8 => self.cells::<AtomicI8>()[index].store(bits as i8, order),
                ElementType::Uint8 => self.cells::<AtomicU8>()[index].store(bits as u8, order),
                ElementType::Uint8Clamped => {
                    self.cells::<AtomicU8>()[index].store(clamp_to_u8(value), order)
                }
                ElementType::Int16 => self.cells::<AtomicI16>()[index].store(bits as i16, order),
                ElementType::Uint16 => self.cells::<AtomicU16>()[index].store(bits as u16, order),
                ElementType::Int32 => self.cells::<AtomicI32>()[index].store(bits as i32, order),
                ElementType::Uint32 => self.cells::<AtomicU32>()[index].store(bits, order),
                ElementType::Float32 => {
                    self.cells::<AtomicU32>()[index].store((value as f32).to_bits(), order)
                }
                ElementType::Float64 => {
                    self.cells::<AtomicU64>()[index].store(value.to_bits(), order)
                }
            }
        }
        true
    }

    /// Copy the elements out as numbers.
    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len).filter_map(|i| self.get(i)).collect()
    }
}

impl fmt::Debug for TypedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedView")
            .field("buffer", &self.buffer.id())
            .field("element_type", &self.element_type)
            .field("byte_offset", &self.byte_offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for ty in ElementType::ALL {
            assert_eq!(ElementType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(ElementType::from_tag(1), None);
        assert_eq!(ElementType::from_tag(11), None);
    }

    #[test]
    fn test_whole_view_lengths() {
        let buf = SharedBuffer::heap(64).unwrap();
        assert_eq!(TypedView::whole(buf.clone(), ElementType::Uint8).len(), 64);
        assert_eq!(TypedView::whole(buf.clone(), ElementType::Int16).len(), 32);
        assert_eq!(TypedView::whole(buf.clone(), ElementType::Float32).len(), 16);
        assert_eq!(TypedView::whole(buf, ElementType::Float64).len(), 8);
    }

    #[test]
    fn test_rejects_misaligned_and_oversized() {
        let buf = SharedBuffer::heap(64).unwrap();
        assert!(TypedView::new(buf.clone(), ElementType::Int32, 2, 1).is_err());
        assert!(TypedView::new(buf.clone(), ElementType::Float64, 8, 8).is_err());
        assert!(TypedView::new(buf, ElementType::Float64, 8, 7).is_ok());
    }

    #[test]
    fn test_views_alias_the_same_bytes() {
        let buf = SharedBuffer::heap(16).unwrap();
        let words = TypedView::whole(buf.clone(), ElementType::Int32);
        let bytes = TypedView::whole(buf, ElementType::Uint8);
        assert!(words.set(0, 0x0102_0304 as f64));
        assert_eq!(bytes.get(0), Some(4.0));
        assert_eq!(bytes.get(3), Some(1.0));
    }

    #[test]
    fn test_integer_stores_wrap() {
        let buf = SharedBuffer::heap(16).unwrap();
        let view = TypedView::whole(buf.clone(), ElementType::Int8);
        view.set(0, 200.0);
        assert_eq!(view.get(0), Some(-56.0));
        view.set(1, -1.5);
        assert_eq!(view.get(1), Some(-1.0));

        let view = TypedView::whole(buf, ElementType::Uint16);
        view.set(0, 65537.0);
        assert_eq!(view.get(0), Some(1.0));
    }

    #[test]
    fn test_clamped_stores() {
        let buf = SharedBuffer::heap(8).unwrap();
        let view = TypedView::whole(buf, ElementType::Uint8Clamped);
        view.set(0, 300.0);
        view.set(1, -4.0);
        view.set(2, 2.5);
        view.set(3, f64::NAN);
        assert_eq!(view.to_vec()[..4], [255.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_floats() {
        let buf = SharedBuffer::heap(32).unwrap();
        let view = TypedView::whole(buf.clone(), ElementType::Float64);
        view.set(2, -0.1);
        assert_eq!(view.get(2).map(f64::to_bits), Some((-0.1f64).to_bits()));
        assert!(view.as_f64_bits().is_some());
        assert!(view.as_i32().is_none());

        let view = TypedView::whole(buf, ElementType::Float32);
        view.set(0, 1.5);
        assert_eq!(view.get(0), Some(1.5));
    }

    #[test]
    fn test_typed_slices_match_element_type() {
        let buf = SharedBuffer::heap(64).unwrap();
        let view = TypedView::new(buf.clone(), ElementType::Int16, 6, 5).unwrap();
        assert!(view.as_i8().is_none());
        assert!(view.as_u16().is_none());
        assert!(view.as_f64_bits().is_none());
        let cells = view.as_i16().unwrap();
        assert_eq!(cells.len(), 5);
        cells[4].store(-2, Ordering::Relaxed);
        assert_eq!(view.get(4), Some(-2.0));

        let clamped = TypedView::whole(buf, ElementType::Uint8Clamped);
        assert_eq!(clamped.as_u8().map(<[_]>::len), Some(64));
        assert_eq!(clamped.as_u8().unwrap()[14].load(Ordering::Relaxed), 0xfe);
    }

    #[test]
    fn test_subview_and_bounds() {
        let buf = SharedBuffer::heap(64).unwrap();
        let view = TypedView::whole(buf, ElementType::Int32);
        let sub = view.subview(4, 4).unwrap();
        assert_eq!(sub.byte_offset(), 16);
        sub.set(0, 9.0);
        assert_eq!(view.get(4), Some(9.0));
        assert!(!sub.set(4, 1.0));
        assert_eq!(sub.get(4), None);
        assert!(view.subview(14, 4).is_err());
    }
}
