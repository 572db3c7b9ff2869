//! In-memory source scene consumed by the assembler
//!
//! The upstream loader parses an authoring-tool export into these types.
//! Identifiers are opaque signed 64-bit values; negative indices mean
//! "absent". The assembler never mutates the source scene.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use std::path::PathBuf;

pub const ATTR_POSITION: u32 = 1 << 0;
pub const ATTR_NORMAL: u32 = 1 << 1;
pub const ATTR_TANGENT: u32 = 1 << 2;
pub const ATTR_COLOR: u32 = 1 << 3;
pub const ATTR_UV0: u32 = 1 << 4;
pub const ATTR_UV1: u32 = 1 << 5;
pub const ATTR_JOINT_INDICES: u32 = 1 << 6;
pub const ATTR_JOINT_WEIGHTS: u32 = 1 << 7;
pub const ATTR_ALL: u32 = ATTR_POSITION
    | ATTR_NORMAL
    | ATTR_TANGENT
    | ATTR_COLOR
    | ATTR_UV0
    | ATTR_UV1
    | ATTR_JOINT_INDICES
    | ATTR_JOINT_WEIGHTS;

/// Fully parsed source scene.
#[derive(Debug, Default)]
pub struct SourceScene {
    /// Identifier of the node the exported scene hangs from.
    pub root_id: i64,
    pub nodes: Vec<SourceNode>,
    /// Per-material surface splits, in emission order. Each carries exactly
    /// one surface; several entries may share a surface identifier.
    pub surface_models: Vec<SurfaceModel>,
    pub materials: Vec<SourceMaterial>,
    pub textures: Vec<SourceTexture>,
    pub animations: Vec<SourceAnimation>,
    pub cameras: Vec<SourceCamera>,
    pub lights: Vec<SourceLight>,
    /// Number of rigid-skin buckets referenced by `extra_skin_index`.
    pub extra_skin_count: usize,
}

impl SourceScene {
    /// Position of the node with identifier `id`.
    pub fn node_index_by_id(&self, id: i64) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// First surface carrying identifier `id`.
    pub fn surface_by_id(&self, id: i64) -> Option<&SourceSurface> {
        self.surface_models
            .iter()
            .map(|m| &m.surface)
            .find(|s| s.id == id)
    }

    pub fn vertex_count(&self) -> usize {
        self.surface_models.iter().map(|m| m.vertices.len()).sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.surface_models.iter().map(|m| m.triangles.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct SourceNode {
    pub id: i64,
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// Identifiers of child nodes, resolved against the scene's node list.
    pub children: Vec<i64>,
    /// Surface attached to this node; values <= 0 mean none.
    pub surface_id: i64,
    /// Light attached to this node; negative means none.
    pub light_index: i64,
    /// Rigid-skin bucket this node belongs to; negative means none.
    pub extra_skin_index: i64,
    pub is_joint: bool,
    pub user_properties: serde_json::Map<String, serde_json::Value>,
}

impl Default for SourceNode {
    fn default() -> Self {
        Self {
            id: -1,
            name: String::new(),
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            children: Vec::new(),
            surface_id: -1,
            light_index: -1,
            extra_skin_index: -1,
            is_joint: false,
            user_properties: serde_json::Map::new(),
        }
    }
}

/// Morph channel metadata shared by all vertices of a surface.
#[derive(Debug, Clone)]
pub struct BlendChannel {
    pub name: String,
    pub default_deform: f32,
    pub has_normals: bool,
    pub has_tangents: bool,
}

#[derive(Debug, Clone)]
pub struct SourceSurface {
    pub id: i64,
    pub name: String,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    pub blend_channels: Vec<BlendChannel>,
    pub joint_ids: Vec<i64>,
    /// Inverse bind matrices, row-major as exported by the authoring tool;
    /// transposed to column-major on write.
    pub inverse_bind_matrices: Vec<Mat4>,
    pub skeleton_root_id: i64,
}

impl Default for SourceSurface {
    fn default() -> Self {
        Self {
            id: -1,
            name: String::new(),
            bounds_min: Vec3::ZERO,
            bounds_max: Vec3::ZERO,
            blend_channels: Vec::new(),
            joint_ids: Vec::new(),
            inverse_bind_matrices: Vec::new(),
            skeleton_root_id: -1,
        }
    }
}

/// Per-channel deltas of one vertex against the base mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlendVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec4,
}

#[derive(Debug, Clone, Default)]
pub struct SourceVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec4,
    pub color: Vec4,
    pub uv0: Vec2,
    pub uv1: Vec2,
    /// Joint influences in chunks of four; `ceil(weight_count / 4)` chunks.
    pub joint_indices: Vec<[u16; 4]>,
    pub joint_weights: Vec<[f32; 4]>,
    /// One entry per blend channel of the surface.
    pub blends: Vec<BlendVertex>,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceTriangle {
    pub verts: [u32; 3],
    pub material_index: usize,
}

/// One per-material slice of a source mesh, produced by the upstream split.
#[derive(Debug, Clone, Default)]
pub struct SurfaceModel {
    pub surface: SourceSurface,
    /// `ATTR_*` bitmask of the attributes present on `vertices`.
    pub attributes: u32,
    pub vertices: Vec<SourceVertex>,
    pub triangles: Vec<SourceTriangle>,
    /// Total joint influences per vertex across all chunks.
    pub weight_count: usize,
}

impl SurfaceModel {
    pub fn has_attribute(&self, bit: u32) -> bool {
        self.attributes & bit != 0
    }

    /// Flattened triangle index list.
    pub fn index_array(&self) -> Vec<u32> {
        let mut result = Vec::with_capacity(self.triangles.len() * 3);
        for triangle in &self.triangles {
            result.extend_from_slice(&triangle.verts);
        }
        result
    }

    /// Number of four-wide joint chunks.
    pub fn weight_chunk_count(&self) -> usize {
        self.weight_count.div_ceil(4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialType {
    Opaque,
    Transparent,
    SkinnedOpaque,
    SkinnedTransparent,
}

impl MaterialType {
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent | Self::SkinnedTransparent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingModel {
    PbrMetRough,
    Blinn,
    Phong,
    Traditional,
}

impl ShadingModel {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::PbrMetRough => "metallic/roughness",
            Self::Blinn => "blinn",
            Self::Phong => "phong",
            Self::Traditional => "traditional",
        }
    }
}

/// Texture slots on a source material, by usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    Albedo = 0,
    Diffuse,
    Normal,
    Emissive,
    Occlusion,
    Metallic,
    Roughness,
    Shininess,
}

pub const TEXTURE_USAGE_COUNT: usize = 8;

/// Shading-model-specific material properties.
#[derive(Debug, Clone, Copy)]
pub enum MaterialProps {
    MetRough {
        diffuse_factor: Vec4,
        emissive_factor: Vec3,
        emissive_intensity: f32,
        metallic: f32,
        roughness: f32,
        invert_roughness_map: bool,
    },
    Traditional {
        diffuse_factor: Vec4,
        emissive_factor: Vec3,
        shininess: f32,
    },
}

#[derive(Debug, Clone)]
pub struct SourceMaterial {
    pub id: i64,
    pub name: String,
    pub material_type: MaterialType,
    pub shading: ShadingModel,
    pub is_double_sided: bool,
    /// Source texture indices by usage; negative means unassigned.
    pub textures: [i64; TEXTURE_USAGE_COUNT],
    pub user_properties: serde_json::Map<String, serde_json::Value>,
    pub props: MaterialProps,
}

impl SourceMaterial {
    pub fn texture(&self, usage: TextureUsage) -> i64 {
        self.textures[usage as usize]
    }

    pub fn has_texture(&self, usage: TextureUsage) -> bool {
        self.texture(usage) >= 0
    }
}

#[derive(Debug, Clone)]
pub struct SourceTexture {
    pub name: String,
    pub file_location: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SourceAnimation {
    pub name: String,
    /// Keyframe times, shared by every channel of the animation.
    pub times: Vec<f32>,
    pub channels: Vec<SourceChannel>,
}

/// Animated values for one target node. Populated tracks have one entry per
/// keyframe; weight tracks carry `keyframes * morph target count` samples.
#[derive(Debug, Clone, Default)]
pub struct SourceChannel {
    pub node_index: usize,
    pub translations: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    pub scales: Vec<Vec3>,
    pub weights: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub enum CameraMode {
    Perspective {
        aspect_ratio: f32,
        fov_degrees_y: f32,
        near_z: f32,
        far_z: f32,
    },
    Orthographic {
        mag_x: f32,
        mag_y: f32,
        near_z: f32,
        far_z: f32,
    },
}

#[derive(Debug, Clone)]
pub struct SourceCamera {
    pub name: String,
    pub node_id: i64,
    pub mode: CameraMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}

#[derive(Debug, Clone)]
pub struct SourceLight {
    pub name: String,
    pub light_type: LightType,
    pub color: Vec3,
    pub intensity: f32,
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
}
