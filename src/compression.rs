//! Geometry compression surface
//!
//! The assembler captures each compressed primitive as a [`CompressedMesh`]
//! and hands it to a [`MeshEncoder`] implementation. The codec itself (a
//! Draco binding, typically) lives outside this crate; tests use a stub.

use anyhow::Result;
use gltf_json::accessor::ComponentType;

use crate::options::DracoOptions;

pub const KHR_DRACO_MESH_COMPRESSION: &str = "KHR_draco_mesh_compression";

/// Attribute classes the codec can quantize independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedSemantic {
    Position,
    Normal,
    TexCoord,
    Color,
    Generic,
}

impl CompressedSemantic {
    /// Quantization bits configured for this class; -1 leaves the encoder
    /// default.
    pub fn quant_bits(&self, options: &DracoOptions) -> i32 {
        match self {
            Self::Position => options.quant_bits_position,
            Self::Normal => options.quant_bits_normal,
            Self::TexCoord => options.quant_bits_tex_coord,
            Self::Color => options.quant_bits_color,
            Self::Generic => options.quant_bits_generic,
        }
    }
}

/// One vertex attribute captured for compression.
#[derive(Debug, Clone)]
pub struct CompressedAttribute {
    /// Dense id, also referenced from the primitive's extension block.
    pub attribute_id: u32,
    pub semantic: CompressedSemantic,
    pub component_type: ComponentType,
    pub dimensions: u8,
    /// Little-endian packed values, `num_points` elements.
    pub data: Vec<u8>,
}

/// In-memory mesh handed to the codec: face list plus captured attributes.
#[derive(Debug, Clone)]
pub struct CompressedMesh {
    pub num_points: usize,
    pub faces: Vec<[u32; 3]>,
    pub attributes: Vec<CompressedAttribute>,
}

impl CompressedMesh {
    pub fn new(num_points: usize, faces: Vec<[u32; 3]>) -> Self {
        Self {
            num_points,
            faces,
            attributes: Vec::new(),
        }
    }

    /// Capture an attribute and return its assigned id.
    pub fn add_attribute(
        &mut self,
        semantic: CompressedSemantic,
        component_type: ComponentType,
        dimensions: u8,
        data: Vec<u8>,
    ) -> u32 {
        let attribute_id = self.attributes.len() as u32;
        self.attributes.push(CompressedAttribute {
            attribute_id,
            semantic,
            component_type,
            dimensions,
            data,
        });
        attribute_id
    }
}

/// Codec surface: encodes a captured mesh into a compressed blob.
///
/// The blob must decode to attributes carrying the ids assigned in
/// `mesh.attributes`; the encoder speed and per-class quantization come
/// from `options` ([`DracoOptions::encoder_speed`]).
pub trait MeshEncoder {
    fn encode(&mut self, mesh: &CompressedMesh, options: &DracoOptions) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_ids_are_dense() {
        let mut mesh = CompressedMesh::new(3, vec![[0, 1, 2]]);
        let a = mesh.add_attribute(CompressedSemantic::Position, ComponentType::F32, 3, vec![]);
        let b = mesh.add_attribute(CompressedSemantic::Normal, ComponentType::F32, 3, vec![]);
        assert_eq!((a, b), (0, 1));
        assert_eq!(mesh.attributes[1].attribute_id, 1);
    }

    #[test]
    fn test_quant_bits_selection() {
        let options = DracoOptions::default();
        assert_eq!(
            CompressedSemantic::Position.quant_bits(&options),
            options.quant_bits_position
        );
        assert_eq!(
            CompressedSemantic::Generic.quant_bits(&options),
            options.quant_bits_generic
        );
    }
}
