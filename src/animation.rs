//! Keyframe animation assembly
//!
//! Each source animation shares one time accessor across its channels; every
//! populated track becomes an output accessor, a linear sampler, and a
//! channel targeting the node's translation, rotation, scale, or morph
//! weights.

use anyhow::Result;
use gltf_json as json;
use json::validation::Checked::Valid;
use tracing::{debug, warn};

use crate::document::GltfDocument;
use crate::scene::SourceScene;

pub fn assemble_animations(doc: &mut GltfDocument, scene: &SourceScene) -> Result<()> {
    for animation in &scene.animations {
        if animation.channels.is_empty() {
            warn!("Animation {:?} has no channels, skipped", animation.name);
            continue;
        }
        if animation.times.is_empty() {
            warn!("Animation {:?} has no keyframes, skipped", animation.name);
            continue;
        }

        let input = doc.add_accessor_and_view(&animation.times);
        let (min, max) = animation
            .times
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            });
        {
            let accessor = doc.accessors.get_mut(input);
            accessor.min = Some(json::Value::from(vec![min]));
            accessor.max = Some(json::Value::from(vec![max]));
        }

        let mut samplers = Vec::new();
        let mut channels = Vec::new();
        debug!(
            "Animation {:?} has {} channels",
            animation.name,
            animation.channels.len()
        );

        for channel in &animation.channels {
            if channel.node_index >= doc.nodes.len() {
                warn!(
                    "Animation {:?} targets unknown node {}, channel skipped",
                    animation.name, channel.node_index
                );
                continue;
            }
            let node = json::Index::new(channel.node_index as u32);

            let mut add_track =
                |output: json::Index<json::Accessor>, path: json::animation::Property| {
                    samplers.push(json::animation::Sampler {
                        extensions: Default::default(),
                        extras: Default::default(),
                        input,
                        interpolation: Valid(json::animation::Interpolation::Linear),
                        output,
                    });
                    channels.push(json::animation::Channel {
                        extensions: Default::default(),
                        extras: Default::default(),
                        sampler: json::Index::new(samplers.len() as u32 - 1),
                        target: json::animation::Target {
                            extensions: Default::default(),
                            extras: Default::default(),
                            node,
                            path: Valid(path),
                        },
                    });
                };

            if !channel.translations.is_empty() {
                let data: Vec<[f32; 3]> =
                    channel.translations.iter().map(|v| v.to_array()).collect();
                let output = doc.add_accessor_and_view(&data);
                add_track(output, json::animation::Property::Translation);
            }
            if !channel.rotations.is_empty() {
                let data: Vec<[f32; 4]> =
                    channel.rotations.iter().map(|q| q.to_array()).collect();
                let output = doc.add_accessor_and_view(&data);
                add_track(output, json::animation::Property::Rotation);
            }
            if !channel.scales.is_empty() {
                let data: Vec<[f32; 3]> = channel.scales.iter().map(|v| v.to_array()).collect();
                let output = doc.add_accessor_and_view(&data);
                add_track(output, json::animation::Property::Scale);
            }
            if !channel.weights.is_empty() {
                let output = doc.add_accessor_and_view(&channel.weights);
                add_track(output, json::animation::Property::MorphTargetWeights);
            }
        }

        doc.animations.hold(json::Animation {
            extensions: Default::default(),
            extras: Default::default(),
            channels,
            name: Some(animation.name.clone()),
            samplers,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SourceAnimation, SourceChannel, SourceNode};
    use glam::{Quat, Vec3};

    fn scene_with_animation(channels: Vec<SourceChannel>) -> SourceScene {
        SourceScene {
            nodes: vec![SourceNode {
                id: 1,
                ..Default::default()
            }],
            animations: vec![SourceAnimation {
                name: "clip".to_string(),
                times: vec![0.0, 0.5, 1.0],
                channels,
            }],
            ..Default::default()
        }
    }

    fn doc_with_one_node() -> GltfDocument {
        let mut doc = GltfDocument::new();
        doc.nodes.hold(json::Node {
            camera: None,
            children: None,
            extensions: Default::default(),
            extras: Default::default(),
            matrix: None,
            mesh: None,
            name: Some("node".to_string()),
            rotation: None,
            scale: None,
            skin: None,
            translation: None,
            weights: None,
        });
        doc
    }

    #[test]
    fn test_tracks_share_time_accessor() {
        let mut doc = doc_with_one_node();
        let scene = scene_with_animation(vec![SourceChannel {
            node_index: 0,
            translations: vec![Vec3::ZERO; 3],
            rotations: vec![Quat::IDENTITY; 3],
            scales: Vec::new(),
            weights: Vec::new(),
        }]);

        assemble_animations(&mut doc, &scene).unwrap();
        assert_eq!(doc.animations.len(), 1);
        let animation = doc.animations.get(json::Index::new(0));
        assert_eq!(animation.channels.len(), 2);
        assert_eq!(animation.samplers.len(), 2);
        assert_eq!(
            animation.samplers[0].input,
            animation.samplers[1].input
        );

        let input = doc.accessors.get(animation.samplers[0].input);
        assert_eq!(input.min, Some(json::Value::from(vec![0.0f32])));
        assert_eq!(input.max, Some(json::Value::from(vec![1.0f32])));
    }

    #[test]
    fn test_empty_animation_skipped() {
        let mut doc = doc_with_one_node();
        let scene = scene_with_animation(Vec::new());
        assemble_animations(&mut doc, &scene).unwrap();
        assert!(doc.animations.is_empty());
    }

    #[test]
    fn test_unknown_node_channel_skipped() {
        let mut doc = doc_with_one_node();
        let scene = scene_with_animation(vec![SourceChannel {
            node_index: 9,
            translations: vec![Vec3::ZERO; 3],
            ..Default::default()
        }]);
        assemble_animations(&mut doc, &scene).unwrap();
        assert_eq!(doc.animations.get(json::Index::new(0)).channels.len(), 0);
    }
}
