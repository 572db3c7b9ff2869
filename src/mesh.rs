//! Primitive assembly: indices, vertex attributes, morph targets, compression

use anyhow::{Context, Result};
use glam::Vec3;
use gltf_json as json;
use json::accessor::{ComponentType, Type};
use json::validation::Checked;
use json::validation::Checked::Valid;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::buffer::{self, Component, Element};
use crate::compression::{
    CompressedMesh, CompressedSemantic, MeshEncoder, KHR_DRACO_MESH_COMPRESSION,
};
use crate::document::GltfDocument;
use crate::options::{GltfOptions, LongIndices};
use crate::scene::{self, SourceScene, SourceVertex, SurfaceModel};

type AttributeMap = BTreeMap<Checked<json::mesh::Semantic>, json::Index<json::Accessor>>;

/// Build one mesh per source surface, one primitive per surface model, and
/// return the meshes keyed by surface identifier.
pub fn assemble_meshes(
    doc: &mut GltfDocument,
    scene: &SourceScene,
    options: &GltfOptions,
    materials_by_id: &HashMap<i64, json::Index<json::Material>>,
    mut encoder: Option<&mut dyn MeshEncoder>,
) -> Result<HashMap<i64, json::Index<json::Mesh>>> {
    let mut mesh_by_surface: HashMap<i64, json::Index<json::Mesh>> = HashMap::new();

    for model in &scene.surface_models {
        let surface = &model.surface;
        let first_triangle = model
            .triangles
            .first()
            .with_context(|| format!("surface {:?} has no triangles", surface.name))?;
        let source_material = scene
            .materials
            .get(first_triangle.material_index)
            .with_context(|| {
                format!(
                    "surface {:?} references material index {} out of range",
                    surface.name, first_triangle.material_index
                )
            })?;
        let material = *materials_by_id
            .get(&source_material.id)
            .with_context(|| format!("material {} was never resolved", source_material.name))?;
        debug!("Surface {:?} uses material {:?}", surface.name, source_material.name);

        // multi-material meshes share one mesh entry with several primitives
        let mesh = *mesh_by_surface.entry(surface.id).or_insert_with(|| {
            let weights: Vec<f32> = surface
                .blend_channels
                .iter()
                .map(|c| c.default_deform)
                .collect();
            doc.meshes.hold(json::Mesh {
                extensions: Default::default(),
                extras: Default::default(),
                name: Some(surface.name.clone()),
                primitives: Vec::new(),
                weights: (!weights.is_empty()).then_some(weights),
            })
        });

        let primitive = build_primitive(doc, model, options, material, &mut encoder)?;
        doc.meshes.get_mut(mesh).primitives.push(primitive);
    }

    Ok(mesh_by_surface)
}

fn build_primitive(
    doc: &mut GltfDocument,
    model: &SurfaceModel,
    options: &GltfOptions,
    material: json::Index<json::Material>,
    encoder: &mut Option<&mut dyn MeshEncoder>,
) -> Result<json::mesh::Primitive> {
    let surface = &model.surface;

    // index width is decided per surface, not globally
    let use_long = match options.long_indices {
        LongIndices::Never => false,
        LongIndices::Always => true,
        LongIndices::Auto => model.vertices.len() > 65535,
    };
    let index_component = if use_long {
        ComponentType::U32
    } else {
        ComponentType::U16
    };

    let mut draco = options.draco.enabled.then(|| {
        CompressedMesh::new(
            model.vertices.len(),
            model.triangles.iter().map(|t| t.verts).collect(),
        )
    });
    let mut draco_attributes: Vec<(String, u32)> = Vec::new();

    let indices = if draco.is_some() {
        // the face list lives in the compressed blob; the accessor carries
        // only the element count
        doc.add_standalone_accessor(index_component, Type::Scalar, model.triangles.len() * 3)
    } else {
        let view = doc.aligned_view(Some(json::buffer::Target::ElementArrayBuffer));
        let data = model.index_array();
        if use_long {
            doc.add_accessor_with_view(view, &data, None)
        } else {
            let short: Vec<u16> = data.iter().map(|&v| v as u16).collect();
            doc.add_accessor_with_view(view, &short, None)
        }
    };

    let mut attributes: AttributeMap = BTreeMap::new();
    let mut position_base = None;
    let mut normal_base = None;
    let mut tangent_base = None;

    if model.has_attribute(scene::ATTR_POSITION) {
        let accessor = add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::Positions,
            "POSITION",
            Some(CompressedSemantic::Position),
            |v| v.position.to_array(),
        );
        doc.set_bounds3(accessor, surface.bounds_min, surface.bounds_max);
        position_base = Some(accessor);
    }
    if model.has_attribute(scene::ATTR_NORMAL) {
        normal_base = Some(add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::Normals,
            "NORMAL",
            Some(CompressedSemantic::Normal),
            |v| v.normal.to_array(),
        ));
    }
    if model.has_attribute(scene::ATTR_TANGENT) {
        // the codec has no tangent class; tangents stay uncompressed
        tangent_base = Some(add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::Tangents,
            "TANGENT",
            None,
            |v| v.tangent.to_array(),
        ));
    }
    if model.has_attribute(scene::ATTR_COLOR) {
        add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::Colors(0),
            "COLOR_0",
            Some(CompressedSemantic::Color),
            |v| v.color.to_array(),
        );
    }
    if model.has_attribute(scene::ATTR_UV0) {
        add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::TexCoords(0),
            "TEXCOORD_0",
            Some(CompressedSemantic::TexCoord),
            |v| v.uv0.to_array(),
        );
    }
    if model.has_attribute(scene::ATTR_UV1) {
        add_attribute(
            doc,
            model,
            &mut draco,
            &mut draco_attributes,
            &mut attributes,
            json::mesh::Semantic::TexCoords(1),
            "TEXCOORD_1",
            Some(CompressedSemantic::TexCoord),
            |v| v.uv1.to_array(),
        );
    }
    if model.has_attribute(scene::ATTR_JOINT_INDICES) {
        for group in 0..model.weight_chunk_count() {
            add_attribute(
                doc,
                model,
                &mut draco,
                &mut draco_attributes,
                &mut attributes,
                json::mesh::Semantic::Joints(group as u32),
                &format!("JOINTS_{}", group),
                Some(CompressedSemantic::Generic),
                |v| v.joint_indices[group],
            );
        }
    }
    if model.has_attribute(scene::ATTR_JOINT_WEIGHTS) {
        for group in 0..model.weight_chunk_count() {
            add_attribute(
                doc,
                model,
                &mut draco,
                &mut draco_attributes,
                &mut attributes,
                json::mesh::Semantic::Weights(group as u32),
                &format!("WEIGHTS_{}", group),
                Some(CompressedSemantic::Generic),
                |v| v.joint_weights[group],
            );
        }
    }

    // every blend channel of the surface becomes a target on the primitive
    let mut targets: Vec<json::mesh::MorphTarget> = Vec::new();
    if !surface.blend_channels.is_empty() {
        match position_base {
            Some(position_base) => {
                // sparse accessors cannot be empty, but a channel can touch
                // no vertex of this primitive; single-element dummy views
                // stand in for those
                let mut dummy_index_view = None;
                let mut dummy_data_view = None;

                for (channel_ix, channel) in surface.blend_channels.iter().enumerate() {
                    let mut shape_min = Vec3::splat(f32::INFINITY);
                    let mut shape_max = Vec3::splat(f32::NEG_INFINITY);
                    let mut sparse_indices: Vec<u32> = Vec::new();
                    let mut positions: Vec<[f32; 3]> = Vec::new();
                    let mut normals: Vec<[f32; 3]> = Vec::new();
                    let mut tangents: Vec<[f32; 4]> = Vec::new();

                    for (jj, vertex) in model.vertices.iter().enumerate() {
                        let blend = vertex.blends[channel_ix];
                        shape_min = shape_min.min(blend.position);
                        shape_max = shape_max.max(blend.position);

                        let keep = options.disable_sparse_blend_shapes
                            || blend.position.length() > 0.0;
                        if keep {
                            sparse_indices.push(jj as u32);
                            positions.push(blend.position.to_array());
                            if options.use_blend_shape_normals && channel.has_normals {
                                normals.push(blend.normal.to_array());
                            }
                            if options.use_blend_shape_tangents && channel.has_tangents {
                                tangents.push(blend.tangent.to_array());
                            }
                        }
                    }

                    let (p_acc, n_acc, t_acc) = if !options.disable_sparse_blend_shapes {
                        debug!(
                            "Channel {:?}: sparse count {}",
                            channel.name,
                            sparse_indices.len()
                        );
                        if sparse_indices.is_empty() {
                            let index_view = match dummy_index_view {
                                Some(view) => view,
                                None => {
                                    let view = doc.aligned_view(None);
                                    if use_long {
                                        doc.copy_to_view(view, &[0u32]);
                                    } else {
                                        doc.copy_to_view(view, &[0u16]);
                                    }
                                    dummy_index_view = Some(view);
                                    view
                                }
                            };
                            let data_view = match dummy_data_view {
                                Some(view) => view,
                                None => {
                                    let view = doc.aligned_view(None);
                                    doc.copy_to_view(view, &[[0.0f32, 0.0, 0.0]]);
                                    dummy_data_view = Some(view);
                                    view
                                }
                            };
                            // one substituted vertex with a zero delta
                            let p_acc = doc.add_sparse_accessor(
                                position_base,
                                index_view,
                                index_component,
                                data_view,
                                1,
                                Some(channel.name.clone()),
                            );
                            (p_acc, None, None)
                        } else {
                            let index_view = doc.aligned_view(None);
                            if use_long {
                                doc.copy_to_view(index_view, &sparse_indices);
                            } else {
                                let short: Vec<u16> =
                                    sparse_indices.iter().map(|&v| v as u16).collect();
                                doc.copy_to_view(index_view, &short);
                            }

                            let values_view = doc.aligned_view(None);
                            let p_acc = doc.add_sparse_accessor_with_view(
                                position_base,
                                index_view,
                                index_component,
                                values_view,
                                &positions,
                                Some(channel.name.clone()),
                            );
                            let mut n_acc = None;
                            if !normals.is_empty() {
                                if let Some(normal_base) = normal_base {
                                    let values_view = doc.aligned_view(None);
                                    n_acc = Some(doc.add_sparse_accessor_with_view(
                                        normal_base,
                                        index_view,
                                        index_component,
                                        values_view,
                                        &normals,
                                        Some(channel.name.clone()),
                                    ));
                                }
                            }
                            let mut t_acc = None;
                            if !tangents.is_empty() {
                                if let Some(tangent_base) = tangent_base {
                                    let values_view = doc.aligned_view(None);
                                    t_acc = Some(doc.add_sparse_accessor_with_view(
                                        tangent_base,
                                        index_view,
                                        index_component,
                                        values_view,
                                        &tangents,
                                        Some(channel.name.clone()),
                                    ));
                                }
                            }
                            (p_acc, n_acc, t_acc)
                        }
                    } else {
                        let view = doc.aligned_view(Some(json::buffer::Target::ArrayBuffer));
                        let p_acc = doc.add_accessor_with_view(
                            view,
                            &positions,
                            Some(channel.name.clone()),
                        );
                        let n_acc = (!normals.is_empty()).then(|| {
                            let view =
                                doc.aligned_view(Some(json::buffer::Target::ArrayBuffer));
                            doc.add_accessor_with_view(
                                view,
                                &normals,
                                Some(channel.name.clone()),
                            )
                        });
                        let t_acc = (!tangents.is_empty()).then(|| {
                            let view =
                                doc.aligned_view(Some(json::buffer::Target::ArrayBuffer));
                            doc.add_accessor_with_view(
                                view,
                                &tangents,
                                Some(channel.name.clone()),
                            )
                        });
                        (p_acc, n_acc, t_acc)
                    };

                    doc.set_bounds3(p_acc, shape_min, shape_max);
                    targets.push(json::mesh::MorphTarget {
                        positions: Some(p_acc),
                        normals: n_acc,
                        tangents: t_acc,
                    });
                }
            }
            None => {
                warn!(
                    "Surface {:?} has blend channels but no position data, targets skipped",
                    surface.name
                );
            }
        }
    }

    let extensions = if let Some(compressed) = draco {
        let encoder = encoder
            .as_deref_mut()
            .context("geometry compression enabled but no encoder provided")?;
        let blob = encoder.encode(&compressed, &options.draco)?;
        let view = doc.raw_view(&blob);

        let mut attrs = serde_json::Map::new();
        for (name, id) in &draco_attributes {
            attrs.insert(name.clone(), serde_json::json!(id));
        }
        let mut others = serde_json::Map::new();
        others.insert(
            KHR_DRACO_MESH_COMPRESSION.to_string(),
            serde_json::json!({
                "bufferView": view.value(),
                "attributes": attrs,
            }),
        );
        Some(json::extensions::mesh::Primitive {
            others,
            ..Default::default()
        })
    } else {
        None
    };

    Ok(json::mesh::Primitive {
        attributes,
        extensions,
        extras: Default::default(),
        indices: Some(indices),
        material: Some(material),
        mode: Valid(json::mesh::Mode::Triangles),
        targets: (!targets.is_empty()).then_some(targets),
    })
}

#[allow(clippy::too_many_arguments)]
fn add_attribute<T: Element>(
    doc: &mut GltfDocument,
    model: &SurfaceModel,
    draco: &mut Option<CompressedMesh>,
    draco_attributes: &mut Vec<(String, u32)>,
    attributes: &mut AttributeMap,
    semantic: json::mesh::Semantic,
    name: &str,
    codec_semantic: Option<CompressedSemantic>,
    extract: impl Fn(&SourceVertex) -> T,
) -> json::Index<json::Accessor> {
    let data: Vec<T> = model.vertices.iter().map(extract).collect();
    let accessor = match (draco.as_mut(), codec_semantic) {
        (Some(compressed), Some(kind)) => {
            let id = compressed.add_attribute(
                kind,
                <T::Comp as Component>::COMPONENT_TYPE,
                buffer::type_multiplicity(T::TYPE) as u8,
                buffer::bytes_of(&data),
            );
            draco_attributes.push((name.to_string(), id));
            doc.add_standalone_accessor(
                <T::Comp as Component>::COMPONENT_TYPE,
                T::TYPE,
                data.len(),
            )
        }
        _ => {
            let view = doc.aligned_view(Some(json::buffer::Target::ArrayBuffer));
            doc.add_accessor_with_view(view, &data, None)
        }
    };
    attributes.insert(Valid(semantic), accessor);
    accessor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SourceSurface, SourceTriangle};

    fn held_material(doc: &mut GltfDocument) -> json::Index<json::Material> {
        doc.materials.hold(json::Material {
            alpha_cutoff: None,
            alpha_mode: Valid(json::material::AlphaMode::Opaque),
            double_sided: false,
            name: Some("test".to_string()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor([1.0; 4]),
                base_color_texture: None,
                metallic_factor: json::material::StrengthFactor(1.0),
                roughness_factor: json::material::StrengthFactor(1.0),
                metallic_roughness_texture: None,
                extensions: Default::default(),
                extras: Default::default(),
            },
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            emissive_factor: json::material::EmissiveFactor([0.0; 3]),
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn triangle_model(vertex_count: usize) -> SurfaceModel {
        let vertices = (0..vertex_count)
            .map(|i| SourceVertex {
                position: Vec3::new(i as f32, 0.0, 0.0),
                ..Default::default()
            })
            .collect();
        SurfaceModel {
            surface: SourceSurface {
                id: 1,
                name: "tri".to_string(),
                bounds_min: Vec3::ZERO,
                bounds_max: Vec3::new(vertex_count as f32, 0.0, 0.0),
                ..Default::default()
            },
            attributes: scene::ATTR_POSITION,
            vertices,
            triangles: vec![SourceTriangle {
                verts: [0, 1, 2],
                material_index: 0,
            }],
            weight_count: 0,
        }
    }

    fn material_map(
        doc: &mut GltfDocument,
    ) -> (HashMap<i64, json::Index<json::Material>>, SourceScene) {
        let material = held_material(doc);
        let mut by_id = HashMap::new();
        by_id.insert(5, material);
        let scene = SourceScene {
            materials: vec![crate::scene::SourceMaterial {
                id: 5,
                name: "test".to_string(),
                material_type: crate::scene::MaterialType::Opaque,
                shading: crate::scene::ShadingModel::PbrMetRough,
                is_double_sided: false,
                textures: [-1; crate::scene::TEXTURE_USAGE_COUNT],
                user_properties: serde_json::Map::new(),
                props: crate::scene::MaterialProps::MetRough {
                    diffuse_factor: glam::Vec4::ONE,
                    emissive_factor: Vec3::ZERO,
                    emissive_intensity: 1.0,
                    metallic: 0.0,
                    roughness: 1.0,
                    invert_roughness_map: false,
                },
            }],
            ..Default::default()
        };
        (by_id, scene)
    }

    #[test]
    fn test_single_triangle_primitive() {
        let mut doc = GltfDocument::new();
        let (by_id, mut scene) = material_map(&mut doc);
        scene.surface_models.push(triangle_model(3));

        let meshes =
            assemble_meshes(&mut doc, &scene, &GltfOptions::default(), &by_id, None).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(doc.meshes.len(), 1);

        let mesh = doc.meshes.get(meshes[&1]);
        assert_eq!(mesh.primitives.len(), 1);
        let primitive = &mesh.primitives[0];
        let indices = doc.accessors.get(primitive.indices.unwrap());
        assert_eq!(indices.count.0, 3);
        assert!(matches!(
            indices.component_type,
            Valid(json::accessor::GenericComponentType(ComponentType::U16))
        ));
        let position = doc
            .accessors
            .get(primitive.attributes[&Valid(json::mesh::Semantic::Positions)]);
        assert_eq!(position.count.0, 3);
        assert!(position.min.is_some() && position.max.is_some());
    }

    #[test]
    fn test_auto_long_indices_promotes_to_u32() {
        let mut doc = GltfDocument::new();
        let (by_id, mut scene) = material_map(&mut doc);
        scene.surface_models.push(triangle_model(70000));

        let meshes =
            assemble_meshes(&mut doc, &scene, &GltfOptions::default(), &by_id, None).unwrap();
        let mesh = doc.meshes.get(meshes[&1]);
        let indices = doc.accessors.get(mesh.primitives[0].indices.unwrap());
        assert!(matches!(
            indices.component_type,
            Valid(json::accessor::GenericComponentType(ComponentType::U32))
        ));
    }

    #[test]
    fn test_shared_mesh_for_multi_material_surface() {
        let mut doc = GltfDocument::new();
        let (by_id, mut scene) = material_map(&mut doc);
        scene.surface_models.push(triangle_model(3));
        scene.surface_models.push(triangle_model(3));

        let meshes =
            assemble_meshes(&mut doc, &scene, &GltfOptions::default(), &by_id, None).unwrap();
        assert_eq!(meshes.len(), 1);
        assert_eq!(doc.meshes.len(), 1);
        assert_eq!(doc.meshes.get(meshes[&1]).primitives.len(), 2);
    }
}
