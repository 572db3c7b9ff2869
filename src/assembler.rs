//! Top-level assembly: source scene to serialized glTF
//!
//! Ordering is strictly deterministic: every holder is filled in source
//! iteration order, and that order is the index order in the emitted JSON.
//! Nodes are populated first so that meshes, skins, cameras, lights, and
//! animation channels can refer to them by index.

use anyhow::{Context, Result};
use gltf_json as json;
use json::validation::Checked::Valid;
use std::collections::HashMap;
use std::io::{Seek, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::animation::assemble_animations;
use crate::compression::MeshEncoder;
use crate::document::{GltfDocument, LightSpot, PunctualLight, KHR_LIGHTS_PUNCTUAL};
use crate::material::resolve_materials;
use crate::mesh::assemble_meshes;
use crate::options::GltfOptions;
use crate::scene::{CameraMode, LightType, SourceScene};
use crate::texture::{ImageIo, TextureBuilder};
use crate::writer;

pub const DEFAULT_SCENE_NAME: &str = "Root Scene";

/// Result of a successful assembly. In standalone JSON mode the caller
/// writes `binary` next to the document under the configured buffer URI; in
/// container mode the bytes are already part of the written file.
pub struct AssembledModel {
    pub binary: Vec<u8>,
}

/// Assemble `scene` into a glTF document and write it to `out`.
///
/// The stream is caller-owned; the assembler only writes and seeks.
/// Combined textures land in `output_folder` unless the container format is
/// requested, in which case images are embedded. `encoder` is required when
/// `options.draco.enabled` is set.
pub fn assemble<W: Write + Seek>(
    out: &mut W,
    output_folder: &Path,
    scene: &SourceScene,
    options: &GltfOptions,
    images: &mut dyn ImageIo,
    encoder: Option<&mut dyn MeshEncoder>,
) -> Result<AssembledModel> {
    debug!("Building render model");
    for (i, material) in scene.materials.iter().enumerate() {
        debug!(
            "Material {}: {} [shading: {}]",
            i,
            material.name,
            material.shading.describe()
        );
    }
    if scene.vertex_count() > 2 * scene.triangle_count() {
        warn!("High vertex count. Make sure there are no unnecessary vertex attributes.");
    }
    debug!("{:7} vertices", scene.vertex_count());
    debug!("{:7} triangles", scene.triangle_count());
    debug!("{:7} textures", scene.textures.len());
    debug!("{:7} nodes", scene.nodes.len());
    debug!("{:7} surfaces", scene.surface_models.len());
    debug!("{:7} animations", scene.animations.len());
    debug!("{:7} cameras", scene.cameras.len());
    debug!("{:7} lights", scene.lights.len());

    let mut doc = GltfDocument::new();

    let nodes_by_id = populate_nodes(&mut doc, scene, options)?;
    assemble_animations(&mut doc, scene)?;

    let mut textures = TextureBuilder::new(scene, options, output_folder, images);
    let materials_by_id = resolve_materials(&mut doc, scene, options, &mut textures)?;

    let mesh_by_surface = assemble_meshes(&mut doc, scene, options, &materials_by_id, encoder)?;

    attach_meshes_and_skins(&mut doc, scene, &nodes_by_id, &mesh_by_surface)?;
    hold_extra_skins(&mut doc, scene);
    attach_cameras(&mut doc, scene, &nodes_by_id);
    if options.use_khr_lights_punctual {
        attach_lights(&mut doc, scene);
    }

    let root_node = *nodes_by_id
        .get(&scene.root_id)
        .context("scene root node does not exist")?;
    let root_scene = doc.scenes.hold(json::Scene {
        extensions: Default::default(),
        extras: Default::default(),
        name: Some(DEFAULT_SCENE_NAME.to_string()),
        nodes: vec![root_node],
    });

    let binary = writer::write_document(out, doc, options, root_scene)?;
    Ok(AssembledModel { binary })
}

/// One glTF node per source node, in source order, so node index equals
/// source position everywhere else in the assembly.
fn populate_nodes(
    doc: &mut GltfDocument,
    scene: &SourceScene,
    options: &GltfOptions,
) -> Result<HashMap<i64, json::Index<json::Node>>> {
    let mut by_id = HashMap::new();

    for node in &scene.nodes {
        let children = node
            .children
            .iter()
            .map(|&child_id| {
                scene
                    .node_index_by_id(child_id)
                    .map(|ix| json::Index::new(ix as u32))
                    .with_context(|| {
                        format!("node {:?} references unknown child {}", node.name, child_id)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let extras = if options.enable_user_properties && !node.user_properties.is_empty() {
            Some(serde_json::value::to_raw_value(&node.user_properties)?)
        } else {
            None
        };

        let ix = doc.nodes.hold(json::Node {
            camera: None,
            children: (!children.is_empty()).then_some(children),
            extensions: Default::default(),
            extras,
            matrix: None,
            mesh: None,
            name: Some(node.name.clone()),
            rotation: Some(json::scene::UnitQuaternion(node.rotation.to_array())),
            scale: Some(node.scale.to_array()),
            skin: None,
            translation: Some(node.translation.to_array()),
            weights: None,
        });
        by_id.insert(node.id, ix);
    }

    Ok(by_id)
}

fn attach_meshes_and_skins(
    doc: &mut GltfDocument,
    scene: &SourceScene,
    nodes_by_id: &HashMap<i64, json::Index<json::Node>>,
    mesh_by_surface: &HashMap<i64, json::Index<json::Mesh>>,
) -> Result<()> {
    for (i, node) in scene.nodes.iter().enumerate() {
        if node.surface_id <= 0 {
            continue;
        }
        let node_ix = json::Index::new(i as u32);
        let surface = scene
            .surface_by_id(node.surface_id)
            .with_context(|| format!("node {:?} references unknown surface", node.name))?;
        let mesh = *mesh_by_surface
            .get(&node.surface_id)
            .with_context(|| format!("surface {:?} was never assembled", surface.name))?;
        doc.nodes.get_mut(node_ix).mesh = Some(mesh);

        if !surface.joint_ids.is_empty() && doc.nodes.get(node_ix).skin.is_none() {
            // glTF wants column-major matrices
            let matrices: Vec<[f32; 16]> = surface
                .inverse_bind_matrices
                .iter()
                .map(|m| m.transpose().to_cols_array())
                .collect();
            let inverse_bind_matrices =
                (!matrices.is_empty()).then(|| doc.add_accessor_and_view(&matrices));

            let joints = surface
                .joint_ids
                .iter()
                .map(|id| {
                    nodes_by_id
                        .get(id)
                        .copied()
                        .with_context(|| format!("skin joint {} does not exist", id))
                })
                .collect::<Result<Vec<_>>>()?;
            let skeleton = nodes_by_id
                .get(&surface.skeleton_root_id)
                .copied()
                .with_context(|| {
                    format!(
                        "skeleton root {} of surface {:?} does not exist",
                        surface.skeleton_root_id, surface.name
                    )
                })?;

            let skin = doc.skins.hold(json::Skin {
                extensions: Default::default(),
                extras: Default::default(),
                inverse_bind_matrices,
                joints,
                name: None,
                skeleton: Some(skeleton),
            });
            doc.nodes.get_mut(node_ix).skin = Some(skin);
        }
    }
    Ok(())
}

/// One rigid skin per extra-skin bucket: joints only, no bind matrices.
fn hold_extra_skins(doc: &mut GltfDocument, scene: &SourceScene) {
    let mut buckets: Vec<Vec<json::Index<json::Node>>> =
        vec![Vec::new(); scene.extra_skin_count];
    for (i, node) in scene.nodes.iter().enumerate() {
        if node.extra_skin_index < 0 {
            continue;
        }
        match buckets.get_mut(node.extra_skin_index as usize) {
            Some(bucket) => bucket.push(json::Index::new(i as u32)),
            None => warn!(
                "node {:?} references extra skin {} out of range",
                node.name, node.extra_skin_index
            ),
        }
    }
    for joints in buckets {
        doc.skins.hold(json::Skin {
            extensions: Default::default(),
            extras: Default::default(),
            inverse_bind_matrices: None,
            joints,
            name: None,
            skeleton: None,
        });
    }
}

fn attach_cameras(
    doc: &mut GltfDocument,
    scene: &SourceScene,
    nodes_by_id: &HashMap<i64, json::Index<json::Node>>,
) {
    for source in &scene.cameras {
        let camera = match source.mode {
            CameraMode::Perspective {
                aspect_ratio,
                fov_degrees_y,
                near_z,
                far_z,
            } => json::Camera {
                name: Some(source.name.clone()),
                orthographic: None,
                perspective: Some(json::camera::Perspective {
                    aspect_ratio: Some(aspect_ratio),
                    yfov: fov_degrees_y * (std::f32::consts::PI / 180.0),
                    zfar: Some(far_z),
                    znear: near_z,
                    extensions: Default::default(),
                    extras: Default::default(),
                }),
                type_: Valid(json::camera::Type::Perspective),
                extensions: Default::default(),
                extras: Default::default(),
            },
            CameraMode::Orthographic {
                mag_x,
                mag_y,
                near_z,
                far_z,
            } => json::Camera {
                name: Some(source.name.clone()),
                orthographic: Some(json::camera::Orthographic {
                    xmag: mag_x,
                    ymag: mag_y,
                    zfar: far_z,
                    znear: near_z,
                    extensions: Default::default(),
                    extras: Default::default(),
                }),
                perspective: None,
                type_: Valid(json::camera::Type::Orthographic),
                extensions: Default::default(),
                extras: Default::default(),
            },
        };
        let ix = doc.cameras.hold(camera);

        match nodes_by_id.get(&source.node_id) {
            Some(node) => doc.nodes.get_mut(*node).camera = Some(ix),
            None => warn!("Camera node id {} does not exist.", source.node_id),
        }
    }
}

fn attach_lights(doc: &mut GltfDocument, scene: &SourceScene) {
    for light in &scene.lights {
        let spot = matches!(light.light_type, LightType::Spot).then(|| LightSpot {
            inner_cone_angle: light.inner_cone_angle,
            outer_cone_angle: light.outer_cone_angle,
        });
        doc.lights.hold(PunctualLight {
            name: Some(light.name.clone()),
            light_type: match light.light_type {
                LightType::Directional => "directional",
                LightType::Point => "point",
                LightType::Spot => "spot",
            }
            .to_string(),
            color: light.color.to_array(),
            // authoring-tool intensity is nominally 100
            intensity: light.intensity / 100.0,
            spot,
        });
    }

    // source light order matches holder order, so the index passes through
    for (i, node) in scene.nodes.iter().enumerate() {
        if node.light_index < 0 {
            continue;
        }
        let mut others = serde_json::Map::new();
        others.insert(
            KHR_LIGHTS_PUNCTUAL.to_string(),
            serde_json::json!({ "light": node.light_index }),
        );
        doc.nodes.get_mut(json::Index::new(i as u32)).extensions =
            Some(json::extensions::scene::Node {
                others,
                ..Default::default()
            });
    }
}
