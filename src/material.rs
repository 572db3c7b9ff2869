//! Source material translation into glTF materials
//!
//! Each source material yields exactly one glTF material. Depending on the
//! authoring convention (metal/rough, Blinn/Phong, other traditional) the
//! resolver picks textures straight through or repacks channels into a
//! combined occlusion/roughness/metallic map via the texture builder.

use anyhow::Result;
use glam::{Vec3, Vec4};
use gltf_json as json;
use json::validation::Checked::Valid;
use std::collections::HashMap;
use tracing::debug;

use crate::document::{GltfDocument, KHR_MATERIALS_UNLIT};
use crate::options::GltfOptions;
use crate::scene::{MaterialProps, ShadingModel, SourceMaterial, SourceScene, TextureUsage};
use crate::texture::TextureBuilder;

/// Conversion with the properties: shininess 0 -> roughness 1,
/// shininess 6 -> roughness 0.5, and roughness -> 0 as shininess grows.
pub fn roughness_from_shininess(shininess: f32) -> f32 {
    (2.0 / (2.0 + shininess)).sqrt()
}

struct PbrMetRough {
    base_color: Option<json::Index<json::Texture>>,
    met_rough: Option<json::Index<json::Texture>>,
    diffuse_factor: Vec4,
    metallic: f32,
    roughness: f32,
}

fn texture_info(index: json::Index<json::Texture>) -> json::texture::Info {
    json::texture::Info {
        index,
        tex_coord: 0,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

fn simple_tex(
    doc: &mut GltfDocument,
    textures: &mut TextureBuilder<'_>,
    material: &SourceMaterial,
    usage: TextureUsage,
) -> Result<Option<json::Index<json::Texture>>> {
    textures.simple(doc, material.texture(usage), "simple")
}

fn same_file(
    scene: &SourceScene,
    material: &SourceMaterial,
    a: TextureUsage,
    b: TextureUsage,
) -> bool {
    let (ia, ib) = (material.texture(a), material.texture(b));
    if ia < 0 || ib < 0 {
        return false;
    }
    let loc = |ix: i64| {
        scene.textures[ix as usize]
            .file_location
            .to_string_lossy()
            .to_lowercase()
    };
    loc(ia) == loc(ib)
}

/// Produce one glTF material per source material, keyed by source id.
pub fn resolve_materials(
    doc: &mut GltfDocument,
    scene: &SourceScene,
    options: &GltfOptions,
    textures: &mut TextureBuilder<'_>,
) -> Result<HashMap<i64, json::Index<json::Material>>> {
    let mut by_id = HashMap::new();

    for material in &scene.materials {
        let is_transparent = material.material_type.is_transparent();

        let mut normal_tex = simple_tex(doc, textures, material, TextureUsage::Normal)?;
        let mut emissive_tex = simple_tex(doc, textures, material, TextureUsage::Emissive)?;
        let mut occlusion_tex = None;
        let mut emissive_factor = Vec3::ZERO;
        let mut emissive_intensity = 1.0;
        let mut pbr: Option<PbrMetRough> = None;

        if options.use_pbr_met_rough {
            match material.props {
                MaterialProps::MetRough {
                    diffuse_factor,
                    emissive_factor: source_emissive,
                    emissive_intensity: source_intensity,
                    metallic,
                    roughness,
                    invert_roughness_map,
                } => {
                    // Metallic and roughness live in the B and G channels of
                    // one combined map; occlusion rides along in R.
                    let has_occlusion = material.has_texture(TextureUsage::Occlusion);
                    let has_roughness = material.has_texture(TextureUsage::Roughness);
                    let has_metallic = material.has_texture(TextureUsage::Metallic);

                    let pass_through = has_occlusion
                        && has_roughness
                        && has_metallic
                        && same_file(
                            scene,
                            material,
                            TextureUsage::Metallic,
                            TextureUsage::Roughness,
                        )
                        && same_file(
                            scene,
                            material,
                            TextureUsage::Metallic,
                            TextureUsage::Occlusion,
                        );

                    let ao_met_rough = if !(has_occlusion || has_roughness || has_metallic) {
                        debug!("Material {}: no ORM textures detected", material.name);
                        None
                    } else if pass_through {
                        // one authored map already serves all three channels
                        debug!("Material {}: detected single ORM texture", material.name);
                        if has_metallic {
                            simple_tex(doc, textures, material, TextureUsage::Metallic)?
                        } else if has_roughness {
                            simple_tex(doc, textures, material, TextureUsage::Roughness)?
                        } else {
                            simple_tex(doc, textures, material, TextureUsage::Occlusion)?
                        }
                    } else {
                        // channels are picked from the slots they will land
                        // in, so an authored ORM map passes through unchanged
                        let combiner = move |pixels: &[[f32; 4]]| {
                            let occlusion = if has_occlusion { pixels[0][0] } else { 1.0 };
                            let rough =
                                pixels[1][1] * if has_roughness { 1.0 } else { roughness };
                            let metal = pixels[2][2] * if has_metallic { 1.0 } else { metallic };
                            [
                                occlusion,
                                if invert_roughness_map {
                                    1.0 - rough
                                } else {
                                    rough
                                },
                                metal,
                                1.0,
                            ]
                        };
                        let combined = textures.combine(
                            doc,
                            &[
                                material.texture(TextureUsage::Occlusion),
                                material.texture(TextureUsage::Roughness),
                                material.texture(TextureUsage::Metallic),
                            ],
                            "ao_met_rough",
                            &combiner,
                            false,
                        )?;
                        if combined.is_some() {
                            debug!(
                                "Material {}: combined multiple ORM textures",
                                material.name
                            );
                        }
                        combined
                    };

                    let base_color = simple_tex(doc, textures, material, TextureUsage::Albedo)?;
                    emissive_factor = source_emissive;
                    emissive_intensity = source_intensity;
                    occlusion_tex = ao_met_rough;
                    pbr = Some(PbrMetRough {
                        base_color,
                        met_rough: ao_met_rough,
                        diffuse_factor,
                        metallic,
                        roughness,
                    });
                }
                MaterialProps::Traditional {
                    diffuse_factor,
                    emissive_factor: source_emissive,
                    shininess,
                } => {
                    // Diffuse channel becomes base color; metallic and
                    // roughness are derived constants.
                    let mut ao_met_rough = None;
                    let mut metallic;
                    let roughness;
                    if matches!(material.shading, ShadingModel::Blinn | ShadingModel::Phong) {
                        metallic = 0.4;
                        let combiner = move |pixels: &[[f32; 4]]| {
                            // shininess scales the texel, unlike the other factors
                            let s = shininess * pixels[0][0];
                            [0.0, roughness_from_shininess(s), 0.4, 1.0]
                        };
                        ao_met_rough = textures.combine(
                            doc,
                            &[material.texture(TextureUsage::Shininess)],
                            "ao_met_rough",
                            &combiner,
                            false,
                        )?;
                        if ao_met_rough.is_some() {
                            // factors become the multiplicative identity
                            metallic = 1.0;
                            roughness = 1.0;
                        } else {
                            roughness = roughness_from_shininess(shininess);
                        }
                    } else {
                        metallic = 0.2;
                        roughness = 0.8;
                    }

                    let base_color = simple_tex(doc, textures, material, TextureUsage::Diffuse)?;
                    emissive_factor = source_emissive;
                    emissive_intensity = 1.0;
                    pbr = Some(PbrMetRough {
                        base_color,
                        met_rough: ao_met_rough,
                        diffuse_factor,
                        metallic,
                        roughness,
                    });
                }
            }
        }

        let mut unlit = false;
        if options.use_khr_mat_unlit {
            normal_tex = None;
            emissive_tex = None;
            emissive_factor = Vec3::ZERO;

            let (diffuse_factor, base_usage) = match material.props {
                MaterialProps::MetRough { diffuse_factor, .. } => {
                    (diffuse_factor, TextureUsage::Albedo)
                }
                MaterialProps::Traditional { diffuse_factor, .. } => {
                    (diffuse_factor, TextureUsage::Diffuse)
                }
            };
            let base_color = simple_tex(doc, textures, material, base_usage)?;
            pbr = Some(PbrMetRough {
                base_color,
                met_rough: None,
                diffuse_factor,
                metallic: 0.0,
                roughness: 1.0,
            });
            unlit = true;
        }

        if occlusion_tex.is_none() {
            occlusion_tex = simple_tex(doc, textures, material, TextureUsage::Occlusion)?;
        }

        let pbr = pbr.unwrap_or(PbrMetRough {
            base_color: None,
            met_rough: None,
            diffuse_factor: Vec4::ONE,
            metallic: 1.0,
            roughness: 1.0,
        });

        let extensions = if unlit {
            let mut others = serde_json::Map::new();
            others.insert(KHR_MATERIALS_UNLIT.to_string(), serde_json::json!({}));
            Some(json::extensions::material::Material {
                others,
                ..Default::default()
            })
        } else {
            None
        };

        let extras = if options.enable_user_properties && !material.user_properties.is_empty() {
            Some(serde_json::value::to_raw_value(&material.user_properties)?)
        } else {
            None
        };

        let emissive = emissive_factor * emissive_intensity;
        let ix = doc.materials.hold(json::Material {
            alpha_cutoff: None,
            alpha_mode: Valid(if is_transparent {
                json::material::AlphaMode::Blend
            } else {
                json::material::AlphaMode::Opaque
            }),
            double_sided: material.is_double_sided,
            name: Some(material.name.clone()),
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor(
                    pbr.diffuse_factor.to_array(),
                ),
                base_color_texture: pbr.base_color.map(texture_info),
                metallic_factor: json::material::StrengthFactor(pbr.metallic),
                roughness_factor: json::material::StrengthFactor(pbr.roughness),
                metallic_roughness_texture: pbr.met_rough.map(texture_info),
                extensions: Default::default(),
                extras: Default::default(),
            },
            normal_texture: normal_tex.map(|index| json::material::NormalTexture {
                index,
                scale: 1.0,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            occlusion_texture: occlusion_tex.map(|index| json::material::OcclusionTexture {
                index,
                strength: json::material::StrengthFactor(1.0),
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            emissive_texture: emissive_tex.map(texture_info),
            emissive_factor: json::material::EmissiveFactor(emissive.to_array()),
            extensions,
            extras,
        });
        by_id.insert(material.id, ix);
    }

    Ok(by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{MaterialType, TEXTURE_USAGE_COUNT};
    use crate::texture::FileImageIo;
    use std::path::Path;

    fn untextured_material(shading: ShadingModel, props: MaterialProps) -> SourceMaterial {
        SourceMaterial {
            id: 1,
            name: "mat".to_string(),
            material_type: MaterialType::Opaque,
            shading,
            is_double_sided: false,
            textures: [-1; TEXTURE_USAGE_COUNT],
            user_properties: serde_json::Map::new(),
            props,
        }
    }

    #[test]
    fn test_roughness_from_shininess() {
        assert!((roughness_from_shininess(0.0) - 1.0).abs() < 1e-6);
        assert!((roughness_from_shininess(6.0) - 0.5).abs() < 1e-6);
        assert!(roughness_from_shininess(1000.0) < 0.05);
    }

    #[test]
    fn test_blinn_without_shininess_texture() {
        let scene = SourceScene {
            materials: vec![untextured_material(
                ShadingModel::Blinn,
                MaterialProps::Traditional {
                    diffuse_factor: Vec4::new(0.5, 0.5, 0.5, 1.0),
                    emissive_factor: Vec3::ZERO,
                    shininess: 6.0,
                },
            )],
            ..Default::default()
        };
        let options = GltfOptions::default();
        let mut io = FileImageIo;
        let mut doc = GltfDocument::new();
        let mut textures = TextureBuilder::new(&scene, &options, Path::new("."), &mut io);

        let by_id = resolve_materials(&mut doc, &scene, &options, &mut textures).unwrap();
        let material = doc.materials.get(by_id[&1]);
        assert!((material.pbr_metallic_roughness.metallic_factor.0 - 0.4).abs() < 1e-6);
        assert!((material.pbr_metallic_roughness.roughness_factor.0 - 0.5).abs() < 1e-6);
        assert!(material.pbr_metallic_roughness.metallic_roughness_texture.is_none());
    }

    #[test]
    fn test_transparent_material_blends() {
        let mut source = untextured_material(
            ShadingModel::PbrMetRough,
            MaterialProps::MetRough {
                diffuse_factor: Vec4::ONE,
                emissive_factor: Vec3::new(1.0, 0.5, 0.0),
                emissive_intensity: 2.0,
                metallic: 0.1,
                roughness: 0.9,
                invert_roughness_map: false,
            },
        );
        source.material_type = MaterialType::SkinnedTransparent;
        let scene = SourceScene {
            materials: vec![source],
            ..Default::default()
        };
        let options = GltfOptions::default();
        let mut io = FileImageIo;
        let mut doc = GltfDocument::new();
        let mut textures = TextureBuilder::new(&scene, &options, Path::new("."), &mut io);

        let by_id = resolve_materials(&mut doc, &scene, &options, &mut textures).unwrap();
        let material = doc.materials.get(by_id[&1]);
        assert!(matches!(
            material.alpha_mode,
            Valid(json::material::AlphaMode::Blend)
        ));
        // emissive factor scaled by intensity
        assert_eq!(material.emissive_factor.0, [2.0, 1.0, 0.0]);
        assert!((material.pbr_metallic_roughness.metallic_factor.0 - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_unlit_material_marks_extension() {
        let scene = SourceScene {
            materials: vec![untextured_material(
                ShadingModel::PbrMetRough,
                MaterialProps::MetRough {
                    diffuse_factor: Vec4::new(0.2, 0.3, 0.4, 1.0),
                    emissive_factor: Vec3::ONE,
                    emissive_intensity: 1.0,
                    metallic: 0.5,
                    roughness: 0.5,
                    invert_roughness_map: false,
                },
            )],
            ..Default::default()
        };
        let options = GltfOptions {
            use_khr_mat_unlit: true,
            ..Default::default()
        };
        let mut io = FileImageIo;
        let mut doc = GltfDocument::new();
        let mut textures = TextureBuilder::new(&scene, &options, Path::new("."), &mut io);

        let by_id = resolve_materials(&mut doc, &scene, &options, &mut textures).unwrap();
        let material = doc.materials.get(by_id[&1]);
        assert_eq!(material.emissive_factor.0, [0.0, 0.0, 0.0]);
        assert_eq!(material.pbr_metallic_roughness.metallic_factor.0, 0.0);
        assert!(material
            .extensions
            .as_ref()
            .is_some_and(|e| e.others.contains_key(KHR_MATERIALS_UNLIT)));
    }
}
