//! Assembly options

/// Index width selection for primitive indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LongIndices {
    /// Always emit 16-bit indices.
    Never,
    /// Promote to 32-bit indices when a surface exceeds 65535 vertices.
    #[default]
    Auto,
    /// Always emit 32-bit indices.
    Always,
}

/// Geometry compression settings, handed to the codec per primitive.
///
/// A value of -1 leaves the corresponding encoder setting at its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DracoOptions {
    pub enabled: bool,
    pub compression_level: i32,
    pub quant_bits_position: i32,
    pub quant_bits_tex_coord: i32,
    pub quant_bits_normal: i32,
    pub quant_bits_color: i32,
    pub quant_bits_generic: i32,
}

impl Default for DracoOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            compression_level: 7,
            quant_bits_position: 14,
            quant_bits_tex_coord: 10,
            quant_bits_normal: 10,
            quant_bits_color: 8,
            quant_bits_generic: 8,
        }
    }
}

impl DracoOptions {
    /// Encoder speed derived from the compression level (higher level,
    /// slower and smaller).
    pub fn encoder_speed(&self) -> Option<i32> {
        (self.compression_level != -1).then(|| 10 - self.compression_level)
    }
}

/// Everything the assembler can be asked to do differently.
#[derive(Debug, Clone)]
pub struct GltfOptions {
    pub long_indices: LongIndices,
    /// Vertex attribute mask honored by the upstream per-material split;
    /// carried here so one options value configures the whole conversion.
    pub keep_attribs: u32,
    pub use_khr_mat_unlit: bool,
    pub use_khr_lights_punctual: bool,
    pub use_pbr_met_rough: bool,
    pub disable_sparse_blend_shapes: bool,
    pub use_blend_shape_normals: bool,
    pub use_blend_shape_tangents: bool,
    pub enable_user_properties: bool,
    /// Emit the binary container instead of standalone JSON.
    pub output_binary: bool,
    /// URI the single buffer references in standalone JSON output.
    pub buffer_uri: String,
    pub draco: DracoOptions,
}

impl Default for GltfOptions {
    fn default() -> Self {
        Self {
            long_indices: LongIndices::Auto,
            keep_attribs: crate::scene::ATTR_ALL,
            use_khr_mat_unlit: false,
            use_khr_lights_punctual: false,
            use_pbr_met_rough: true,
            disable_sparse_blend_shapes: false,
            use_blend_shape_normals: false,
            use_blend_shape_tangents: false,
            enable_user_properties: false,
            output_binary: false,
            buffer_uri: "buffer.bin".to_string(),
            draco: DracoOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_speed_from_level() {
        let mut draco = DracoOptions::default();
        assert_eq!(draco.encoder_speed(), Some(3));
        draco.compression_level = -1;
        assert_eq!(draco.encoder_speed(), None);
        draco.compression_level = 10;
        assert_eq!(draco.encoder_speed(), Some(0));
    }
}
