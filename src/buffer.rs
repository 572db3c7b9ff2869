//! Append-only binary arena with alignment-aware packing

use gltf_json as json;
use json::accessor::{ComponentType, Type};

/// Single contiguous byte buffer backing every buffer view in the document.
///
/// All multi-byte values are written little-endian regardless of host. The
/// arena is append-only during assembly; the final padding to a 4-byte
/// multiple happens only when the document is serialized.
#[derive(Debug, Default)]
pub struct BinaryBuffer {
    bytes: Vec<u8>,
}

impl BinaryBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Pad the arena up to `alignment`, then append `bytes`. Returns the
    /// offset of the first appended byte.
    pub fn append_aligned(&mut self, bytes: &[u8], alignment: usize) -> usize {
        self.pad_to(alignment);
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        offset
    }

    /// Append without padding. Pre-encoded blobs keep their own layout.
    pub fn raw_append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        offset
    }

    /// Pad the arena with zero bytes up to a multiple of `alignment`.
    pub fn pad_to(&mut self, alignment: usize) {
        while self.bytes.len() % alignment != 0 {
            self.bytes.push(0);
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn view_bytes(&self, offset: usize, length: usize) -> &[u8] {
        &self.bytes[offset..offset + length]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Scalar component written little-endian.
pub trait Component: Copy {
    const COMPONENT_TYPE: ComponentType;
    fn put_le(self, out: &mut Vec<u8>);
}

impl Component for u16 {
    const COMPONENT_TYPE: ComponentType = ComponentType::U16;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Component for u32 {
    const COMPONENT_TYPE: ComponentType = ComponentType::U32;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Component for f32 {
    const COMPONENT_TYPE: ComponentType = ComponentType::F32;
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// One accessor element: a scalar or a fixed-size vector/matrix of one
/// component type.
pub trait Element: Copy {
    type Comp: Component;
    const TYPE: Type;
    fn put_le(&self, out: &mut Vec<u8>);
}

impl Element for u16 {
    type Comp = u16;
    const TYPE: Type = Type::Scalar;
    fn put_le(&self, out: &mut Vec<u8>) {
        Component::put_le(*self, out);
    }
}

impl Element for u32 {
    type Comp = u32;
    const TYPE: Type = Type::Scalar;
    fn put_le(&self, out: &mut Vec<u8>) {
        Component::put_le(*self, out);
    }
}

impl Element for f32 {
    type Comp = f32;
    const TYPE: Type = Type::Scalar;
    fn put_le(&self, out: &mut Vec<u8>) {
        Component::put_le(*self, out);
    }
}

macro_rules! impl_element_for_array {
    ($($comp:ty, $n:expr, $type_:expr;)*) => {
        $(
            impl Element for [$comp; $n] {
                type Comp = $comp;
                const TYPE: Type = $type_;
                fn put_le(&self, out: &mut Vec<u8>) {
                    for c in self {
                        Component::put_le(*c, out);
                    }
                }
            }
        )*
    };
}

impl_element_for_array! {
    f32, 2, Type::Vec2;
    f32, 3, Type::Vec3;
    f32, 4, Type::Vec4;
    f32, 16, Type::Mat4;
    u16, 4, Type::Vec4;
}

/// Little-endian byte image of `data`.
pub fn bytes_of<T: Element>(data: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * element_size::<T>());
    for elem in data {
        elem.put_le(&mut out);
    }
    out
}

pub fn component_size(component_type: ComponentType) -> usize {
    match component_type {
        ComponentType::I8 | ComponentType::U8 => 1,
        ComponentType::I16 | ComponentType::U16 => 2,
        ComponentType::U32 | ComponentType::F32 => 4,
    }
}

pub fn type_multiplicity(type_: Type) -> usize {
    match type_ {
        Type::Scalar => 1,
        Type::Vec2 => 2,
        Type::Vec3 => 3,
        Type::Vec4 => 4,
        Type::Mat2 => 4,
        Type::Mat3 => 9,
        Type::Mat4 => 16,
    }
}

pub fn element_size<T: Element>() -> usize {
    component_size(<T::Comp as Component>::COMPONENT_TYPE) * type_multiplicity(T::TYPE)
}

/// Typed appends are aligned to the component's natural size, never less
/// than 4.
pub fn alignment_of<T: Element>() -> usize {
    component_size(<T::Comp as Component>::COMPONENT_TYPE).max(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_aligned_pads() {
        let mut buffer = BinaryBuffer::new();
        buffer.raw_append(&[1, 2, 3]);
        let offset = buffer.append_aligned(&[9, 9], 4);
        assert_eq!(offset, 4);
        assert_eq!(buffer.view_bytes(3, 1), &[0]);
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_raw_append_keeps_offset() {
        let mut buffer = BinaryBuffer::new();
        buffer.raw_append(&[1]);
        assert_eq!(buffer.raw_append(&[2, 3]), 1);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_bytes_of_little_endian() {
        let bytes = bytes_of(&[0x0102u16, 0x0304]);
        assert_eq!(bytes, vec![0x02, 0x01, 0x04, 0x03]);

        let bytes = bytes_of(&[[1.0f32, 0.0, 0.0]]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(element_size::<u16>(), 2);
        assert_eq!(element_size::<[f32; 3]>(), 12);
        assert_eq!(element_size::<[f32; 16]>(), 64);
        assert_eq!(element_size::<[u16; 4]>(), 8);
        assert_eq!(alignment_of::<u16>(), 4);
        assert_eq!(alignment_of::<[f32; 4]>(), 4);
    }
}
