//! glTF document under construction
//!
//! One [`GltfDocument`] owns the binary arena and every entity table. Buffer
//! views and accessors are created through the methods here so that layout
//! invariants (alignment, little-endian packing, view growth) hold by
//! construction.

use anyhow::Result;
use gltf_json as json;
use json::validation::Checked::Valid;
use json::validation::USize64;
use serde::Serialize;

use crate::buffer::{self, BinaryBuffer, Component, Element};
use crate::holder::Holder;
use crate::options::GltfOptions;

pub const KHR_MATERIALS_UNLIT: &str = "KHR_materials_unlit";
pub const KHR_LIGHTS_PUNCTUAL: &str = "KHR_lights_punctual";

/// Punctual light entry, emitted inside the root `KHR_lights_punctual`
/// extension block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PunctualLight {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub light_type: String,
    pub color: [f32; 3],
    pub intensity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot: Option<LightSpot>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightSpot {
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
}

pub struct GltfDocument {
    pub binary: BinaryBuffer,
    pub views: Holder<json::buffer::View>,
    pub accessors: Holder<json::Accessor>,
    pub meshes: Holder<json::Mesh>,
    pub materials: Holder<json::Material>,
    pub nodes: Holder<json::Node>,
    pub scenes: Holder<json::Scene>,
    pub skins: Holder<json::Skin>,
    pub animations: Holder<json::Animation>,
    pub cameras: Holder<json::Camera>,
    pub textures: Holder<json::Texture>,
    pub images: Holder<json::Image>,
    pub samplers: Holder<json::texture::Sampler>,
    pub lights: Holder<PunctualLight>,
}

impl GltfDocument {
    pub fn new() -> Self {
        Self {
            binary: BinaryBuffer::new(),
            views: Holder::new(),
            accessors: Holder::new(),
            meshes: Holder::new(),
            materials: Holder::new(),
            nodes: Holder::new(),
            scenes: Holder::new(),
            skins: Holder::new(),
            animations: Holder::new(),
            cameras: Holder::new(),
            textures: Holder::new(),
            images: Holder::new(),
            samplers: Holder::new(),
            lights: Holder::new(),
        }
    }

    /// Fresh empty buffer view starting at a 4-aligned arena offset.
    pub fn aligned_view(
        &mut self,
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        self.binary.pad_to(4);
        let offset = self.binary.len();
        self.views.hold(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64(0),
            byte_offset: Some(USize64(offset as u64)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        })
    }

    /// View covering an arbitrary pre-encoded byte blob. No target, no
    /// alignment padding.
    pub fn raw_view(&mut self, bytes: &[u8]) -> json::Index<json::buffer::View> {
        let offset = self.binary.raw_append(bytes);
        self.views.hold(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64(bytes.len() as u64),
            byte_offset: Some(USize64(offset as u64)),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: None,
        })
    }

    /// Convert `data` to little-endian bytes, append behind `view` with the
    /// component's natural alignment, and extend the view to cover the new
    /// bytes. Returns the offset of the data relative to the view start.
    ///
    /// A view only grows while it is the arena tail; anything else would
    /// silently interleave foreign bytes into it.
    pub fn copy_to_view<T: Element>(
        &mut self,
        view: json::Index<json::buffer::View>,
        data: &[T],
    ) -> usize {
        let (view_offset, view_length) = {
            let v = self.views.get(view);
            (
                v.byte_offset.map(|o| o.0 as usize).unwrap_or(0),
                v.byte_length.0 as usize,
            )
        };
        assert_eq!(
            view_offset + view_length,
            self.binary.len(),
            "buffer view is not the arena tail"
        );

        let bytes = buffer::bytes_of(data);
        let offset = self
            .binary
            .append_aligned(&bytes, buffer::alignment_of::<T>());
        let offset_in_view = offset - view_offset;

        let v = self.views.get_mut(view);
        v.byte_length = USize64((offset_in_view + bytes.len()) as u64);
        offset_in_view
    }

    /// Accessor plus a dedicated view for `data`. The view target is
    /// inferred from the component type: integer index types go to the
    /// element array, everything else carries no target.
    pub fn add_accessor_and_view<T: Element>(
        &mut self,
        data: &[T],
    ) -> json::Index<json::Accessor> {
        let target = match <T::Comp as Component>::COMPONENT_TYPE {
            json::accessor::ComponentType::U8
            | json::accessor::ComponentType::U16
            | json::accessor::ComponentType::U32 => {
                Some(json::buffer::Target::ElementArrayBuffer)
            }
            _ => None,
        };
        let view = self.aligned_view(target);
        self.add_accessor_with_view(view, data, None)
    }

    /// Accessor over `data` appended at the current end of `view`.
    pub fn add_accessor_with_view<T: Element>(
        &mut self,
        view: json::Index<json::buffer::View>,
        data: &[T],
        name: Option<String>,
    ) -> json::Index<json::Accessor> {
        assert!(!data.is_empty(), "accessor over empty data");
        let offset_in_view = self.copy_to_view(view, data);
        self.accessors.hold(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(offset_in_view as u64)),
            count: USize64(data.len() as u64),
            component_type: Valid(json::accessor::GenericComponentType(
                <T::Comp as Component>::COMPONENT_TYPE,
            )),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(T::TYPE),
            min: None,
            max: None,
            name,
            normalized: false,
            sparse: None,
        })
    }

    /// Accessor with no buffer view; the data lives in a compressed blob.
    pub fn add_standalone_accessor(
        &mut self,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        count: usize,
    ) -> json::Index<json::Accessor> {
        assert!(count > 0, "accessor over empty data");
        self.accessors.hold(json::Accessor {
            buffer_view: None,
            byte_offset: None,
            count: USize64(count as u64),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
        })
    }

    /// Sparse accessor whose non-sparse fields mirror `base`, so consumers
    /// that ignore sparse still read something coherent.
    pub fn add_sparse_accessor(
        &mut self,
        base: json::Index<json::Accessor>,
        indices_view: json::Index<json::buffer::View>,
        indices_component_type: json::accessor::ComponentType,
        values_view: json::Index<json::buffer::View>,
        sparse_count: usize,
        name: Option<String>,
    ) -> json::Index<json::Accessor> {
        assert!(sparse_count > 0, "sparse accessor with no substitutions");
        let mut accessor = self.accessors.get(base).clone();
        accessor.name = name;
        accessor.sparse = Some(json::accessor::sparse::Sparse {
            count: USize64(sparse_count as u64),
            indices: json::accessor::sparse::Indices {
                buffer_view: indices_view,
                byte_offset: Default::default(),
                component_type: Valid(json::accessor::IndexComponentType(
                    indices_component_type,
                )),
                extensions: Default::default(),
                extras: Default::default(),
            },
            values: json::accessor::sparse::Values {
                buffer_view: values_view,
                byte_offset: Default::default(),
                extensions: Default::default(),
                extras: Default::default(),
            },
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.accessors.hold(accessor)
    }

    /// Sparse accessor that first copies `values` into `values_view`.
    pub fn add_sparse_accessor_with_view<T: Element>(
        &mut self,
        base: json::Index<json::Accessor>,
        indices_view: json::Index<json::buffer::View>,
        indices_component_type: json::accessor::ComponentType,
        values_view: json::Index<json::buffer::View>,
        values: &[T],
        name: Option<String>,
    ) -> json::Index<json::Accessor> {
        self.copy_to_view(values_view, values);
        self.add_sparse_accessor(
            base,
            indices_view,
            indices_component_type,
            values_view,
            values.len(),
            name,
        )
    }

    /// Record element-wise bounds on an accessor.
    pub fn set_bounds3(
        &mut self,
        accessor: json::Index<json::Accessor>,
        min: glam::Vec3,
        max: glam::Vec3,
    ) {
        let a = self.accessors.get_mut(accessor);
        a.min = Some(json::Value::from(vec![min.x, min.y, min.z]));
        a.max = Some(json::Value::from(vec![max.x, max.y, max.z]));
    }

    /// The shared repeat-wrap sampler, created on first use.
    pub fn default_sampler(&mut self) -> json::Index<json::texture::Sampler> {
        if self.samplers.is_empty() {
            self.samplers.hold(json::texture::Sampler {
                mag_filter: None,
                min_filter: None,
                name: None,
                wrap_s: Valid(json::texture::WrappingMode::Repeat),
                wrap_t: Valid(json::texture::WrappingMode::Repeat),
                extensions: Default::default(),
                extras: Default::default(),
            })
        } else {
            json::Index::new(0)
        }
    }

    /// Finalize into a serializable root plus the arena bytes, padded to a
    /// 4-byte multiple.
    pub fn into_root(
        mut self,
        options: &GltfOptions,
        scene: json::Index<json::Scene>,
    ) -> Result<(json::Root, Vec<u8>)> {
        self.binary.pad_to(4);

        let mut extensions_used = Vec::new();
        let mut extensions_required = Vec::new();
        if options.use_khr_mat_unlit {
            extensions_used.push(KHR_MATERIALS_UNLIT.to_string());
        }
        if !self.lights.is_empty() {
            extensions_used.push(KHR_LIGHTS_PUNCTUAL.to_string());
        }
        if options.draco.enabled {
            extensions_used.push(crate::compression::KHR_DRACO_MESH_COMPRESSION.to_string());
            extensions_required.push(crate::compression::KHR_DRACO_MESH_COMPRESSION.to_string());
        }

        let extensions = if self.lights.is_empty() {
            Default::default()
        } else {
            let lights = serde_json::to_value(self.lights.into_vec())?;
            let mut others = serde_json::Map::new();
            others.insert(
                KHR_LIGHTS_PUNCTUAL.to_string(),
                serde_json::json!({ "lights": lights }),
            );
            Some(json::extensions::root::Root {
                others,
                ..Default::default()
            })
        };

        let binary = self.binary.into_bytes();
        let buffers = vec![json::Buffer {
            byte_length: USize64(binary.len() as u64),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: (!options.output_binary).then(|| options.buffer_uri.clone()),
        }];

        let root = json::Root {
            accessors: self.accessors.into_vec(),
            animations: self.animations.into_vec(),
            asset: json::Asset {
                copyright: None,
                extensions: Default::default(),
                extras: Default::default(),
                generator: Some(crate::GENERATOR.to_string()),
                min_version: None,
                version: "2.0".to_string(),
            },
            buffers,
            buffer_views: self.views.into_vec(),
            cameras: self.cameras.into_vec(),
            extensions,
            extensions_required,
            extensions_used,
            extras: Default::default(),
            images: self.images.into_vec(),
            materials: self.materials.into_vec(),
            meshes: self.meshes.into_vec(),
            nodes: self.nodes.into_vec(),
            samplers: self.samplers.into_vec(),
            scene: Some(scene),
            scenes: self.scenes.into_vec(),
            skins: self.skins.into_vec(),
            textures: self.textures.into_vec(),
        };
        Ok((root, binary))
    }
}

impl Default for GltfDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_and_view_layout() {
        let mut doc = GltfDocument::new();
        let acc = doc.add_accessor_and_view(&[[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let accessor = doc.accessors.get(acc);
        assert_eq!(accessor.count.0, 2);
        assert_eq!(accessor.byte_offset.unwrap().0, 0);
        let view = doc.views.get(accessor.buffer_view.unwrap());
        assert_eq!(view.byte_length.0, 24);
        assert_eq!(doc.binary.len(), 24);
    }

    #[test]
    fn test_integer_data_targets_element_array() {
        let mut doc = GltfDocument::new();
        let acc = doc.add_accessor_and_view(&[0u16, 1, 2]);
        let view = doc.views.get(doc.accessors.get(acc).buffer_view.unwrap());
        assert!(matches!(
            view.target,
            Some(Valid(json::buffer::Target::ElementArrayBuffer))
        ));

        let acc = doc.add_accessor_and_view(&[0.0f32, 1.0]);
        let view = doc.views.get(doc.accessors.get(acc).buffer_view.unwrap());
        assert!(view.target.is_none());
    }

    #[test]
    fn test_shared_view_offsets() {
        let mut doc = GltfDocument::new();
        let view = doc.aligned_view(Some(json::buffer::Target::ArrayBuffer));
        let a = doc.add_accessor_with_view(view, &[0u16, 1, 2], None);
        let b = doc.add_accessor_with_view(view, &[3u16, 4, 5], None);
        assert_eq!(doc.accessors.get(a).byte_offset.unwrap().0, 0);
        // second append is re-aligned to 4 within the view
        assert_eq!(doc.accessors.get(b).byte_offset.unwrap().0, 8);
        assert_eq!(doc.views.get(view).byte_length.0, 14);
    }

    #[test]
    fn test_views_start_aligned() {
        let mut doc = GltfDocument::new();
        doc.binary.raw_append(&[0u8; 3]);
        let view = doc.aligned_view(None);
        assert_eq!(doc.views.get(view).byte_offset.unwrap().0, 4);
    }

    #[test]
    fn test_sparse_accessor_mirrors_base() {
        let mut doc = GltfDocument::new();
        let base = doc.add_accessor_and_view(&[[0.0f32, 0.0, 0.0]; 4]);
        let indices_view = doc.aligned_view(None);
        doc.copy_to_view(indices_view, &[2u16]);
        let values_view = doc.aligned_view(None);
        let sparse = doc.add_sparse_accessor_with_view(
            base,
            indices_view,
            json::accessor::ComponentType::U16,
            values_view,
            &[[0.5f32, 0.0, 0.0]],
            Some("shape".to_string()),
        );
        let accessor = doc.accessors.get(sparse);
        assert_eq!(accessor.count.0, 4);
        assert_eq!(accessor.buffer_view, doc.accessors.get(base).buffer_view);
        let sparse = accessor.sparse.as_ref().unwrap();
        assert_eq!(sparse.count.0, 1);
        assert_eq!(sparse.indices.buffer_view, indices_view);
        assert_eq!(sparse.values.buffer_view, values_view);
    }

    #[test]
    fn test_default_sampler_is_shared() {
        let mut doc = GltfDocument::new();
        let a = doc.default_sampler();
        let b = doc.default_sampler();
        assert_eq!(a, b);
        assert_eq!(doc.samplers.len(), 1);
    }
}
