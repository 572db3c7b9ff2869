//! Source-scene to glTF 2.0 assembler
//!
//! This library takes a fully parsed authoring-tool export (nodes, surfaces,
//! materials, animations, cameras, lights, textures, skins, blend shapes)
//! and lays it out as a glTF 2.0 document: one contiguous binary arena, the
//! accessor / buffer-view / primitive graph indexing into it, and the JSON
//! object graph, emitted either as standalone pretty-printed JSON plus a
//! `.bin` sidecar or as a `.glb` container.
//!
//! # Example
//!
//! ```no_run
//! use gltf_assembler::{assemble, FileImageIo, GltfOptions, SourceScene};
//! use std::io::Cursor;
//!
//! let scene = SourceScene::default();
//! let options = GltfOptions::default();
//! let mut io = FileImageIo;
//! let mut out = Cursor::new(Vec::new());
//!
//! let model = assemble(&mut out, "out".as_ref(), &scene, &options, &mut io, None)?;
//! std::fs::write("out/buffer.bin", &model.binary)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Image decoding and geometry compression are collaborator surfaces: see
//! [`ImageIo`] and [`MeshEncoder`].

pub mod animation;
pub mod assembler;
pub mod buffer;
pub mod compression;
pub mod document;
pub mod holder;
pub mod material;
pub mod mesh;
pub mod options;
pub mod scene;
pub mod texture;
pub mod writer;

pub use assembler::{assemble, AssembledModel, DEFAULT_SCENE_NAME};
pub use compression::{CompressedMesh, CompressedSemantic, MeshEncoder};
pub use document::{GltfDocument, PunctualLight};
pub use holder::Holder;
pub use options::{DracoOptions, GltfOptions, LongIndices};
pub use scene::SourceScene;
pub use texture::{FileImageIo, ImageIo, PixelImage, TextureBuilder};

// Re-export the JSON object model used throughout the public API
pub use gltf_json as json;

/// Generator tag stamped into every emitted asset block.
pub const GENERATOR: &str = concat!("FBX2glTF v", env!("CARGO_PKG_VERSION"));
