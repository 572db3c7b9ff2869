//! Texture creation, deduplication, and channel repacking

use anyhow::{Context, Result};
use gltf_json as json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::document::GltfDocument;
use crate::options::GltfOptions;
use crate::scene::SourceScene;

/// Sample used for absent combine inputs: multiplicative identity in every
/// channel.
pub const NEUTRAL_PIXEL: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Normalized RGBA image, the working currency of channel repacking.
#[derive(Debug, Clone)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[f32; 4]>,
}

impl PixelImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; (width * height) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: [f32; 4]) {
        self.pixels[(y * self.width + x) as usize] = value;
    }

    /// Nearest sample at the position `(x, y)` occupies in a
    /// `target_w x target_h` grid.
    pub fn sample_scaled(&self, x: u32, y: u32, target_w: u32, target_h: u32) -> [f32; 4] {
        let sx = ((x as u64 * self.width as u64) / target_w as u64) as u32;
        let sy = ((y as u64 * self.height as u64) / target_h as u64) as u32;
        self.pixel(sx.min(self.width - 1), sy.min(self.height - 1))
    }
}

/// Decode/encode and filesystem surface used by the texture builder. The
/// assembler itself never touches image files.
pub trait ImageIo {
    /// Decode the image at `path` into normalized RGBA pixels.
    fn load(&mut self, path: &Path) -> Result<PixelImage>;
    /// Raw encoded bytes of the image at `path`, for embedding.
    fn read_bytes(&mut self, path: &Path) -> Result<Vec<u8>>;
    /// Encode `img` as PNG.
    fn encode_png(&mut self, img: &PixelImage) -> Result<Vec<u8>>;
    /// Write `img` as a PNG file at `path`.
    fn write_png(&mut self, path: &Path, img: &PixelImage) -> Result<()>;
}

/// Default [`ImageIo`] backed by the `image` crate.
#[derive(Debug, Default)]
pub struct FileImageIo;

fn to_rgba_image(img: &PixelImage) -> Result<image::RgbaImage> {
    let mut data = Vec::with_capacity(img.pixels.len() * 4);
    for pixel in &img.pixels {
        for channel in pixel {
            data.push((channel.clamp(0.0, 1.0) * 255.0 + 0.5) as u8);
        }
    }
    image::RgbaImage::from_raw(img.width, img.height, data)
        .context("pixel buffer does not match image dimensions")
}

impl ImageIo for FileImageIo {
    fn load(&mut self, path: &Path) -> Result<PixelImage> {
        let img =
            image::open(path).with_context(|| format!("Failed to load image: {:?}", path))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba
            .pixels()
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();
        Ok(PixelImage {
            width,
            height,
            pixels,
        })
    }

    fn read_bytes(&mut self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))
    }

    fn encode_png(&mut self, img: &PixelImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        to_rgba_image(img)?
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .context("Failed to encode PNG")?;
        Ok(bytes)
    }

    fn write_png(&mut self, path: &Path, img: &PixelImage) -> Result<()> {
        to_rgba_image(img)?
            .save(path)
            .with_context(|| format!("Failed to write image: {:?}", path))
    }
}

/// Per-texel combiner: receives one sampled pixel per combine input (neutral
/// where the input is absent) and returns the output pixel.
pub type PixelCombiner<'a> = dyn Fn(&[[f32; 4]]) -> [f32; 4] + 'a;

/// Creates glTF texture/image/sampler entries on demand, deduplicating by
/// logical key. Combined images are written next to the output document, or
/// embedded into the binary arena when the container format is requested.
pub struct TextureBuilder<'a> {
    scene: &'a SourceScene,
    options: &'a GltfOptions,
    output_folder: PathBuf,
    io: &'a mut dyn ImageIo,
    by_key: HashMap<String, json::Index<json::Texture>>,
}

impl<'a> TextureBuilder<'a> {
    pub fn new(
        scene: &'a SourceScene,
        options: &'a GltfOptions,
        output_folder: &Path,
        io: &'a mut dyn ImageIo,
    ) -> Self {
        Self {
            scene,
            options,
            output_folder: output_folder.to_path_buf(),
            io,
            by_key: HashMap::new(),
        }
    }

    /// Texture for `source_index` as-is. Returns `None` for a negative
    /// index; otherwise creates the entry lazily, deduplicated by
    /// `(source_index, tag)`.
    pub fn simple(
        &mut self,
        doc: &mut GltfDocument,
        source_index: i64,
        tag: &str,
    ) -> Result<Option<json::Index<json::Texture>>> {
        if source_index < 0 {
            return Ok(None);
        }
        let key = format!("simple|{}|{}", tag, source_index);
        if let Some(ix) = self.by_key.get(&key) {
            return Ok(Some(*ix));
        }

        let scene = self.scene;
        let texture = &scene.textures[source_index as usize];
        let image = if self.options.output_binary {
            let bytes = self.io.read_bytes(&texture.file_location)?;
            let view = doc.raw_view(&bytes);
            json::Image {
                buffer_view: Some(view),
                mime_type: mime_for_path(&texture.file_location),
                name: Some(texture.name.clone()),
                uri: None,
                extensions: Default::default(),
                extras: Default::default(),
            }
        } else {
            let uri = texture
                .file_location
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| texture.file_location.to_string_lossy().into_owned());
            json::Image {
                buffer_view: None,
                mime_type: None,
                name: Some(texture.name.clone()),
                uri: Some(uri),
                extensions: Default::default(),
                extras: Default::default(),
            }
        };

        let ix = self.hold_texture(doc, texture.name.clone(), image);
        self.by_key.insert(key, ix);
        Ok(Some(ix))
    }

    /// Texture computed per-texel from the sampled pixels of
    /// `source_indices`. Returns `None` only when every index is negative.
    ///
    /// Output dimensions are the per-axis maxima over the inputs; each input
    /// is nearest-sampled at the proportional position. Deduplicated by
    /// `(tag, ordered source file locations)`, case-insensitive.
    pub fn combine(
        &mut self,
        doc: &mut GltfDocument,
        source_indices: &[i64],
        tag: &str,
        combiner: &PixelCombiner<'_>,
        _srgb: bool,
    ) -> Result<Option<json::Index<json::Texture>>> {
        if source_indices.iter().all(|&ix| ix < 0) {
            return Ok(None);
        }

        let scene = self.scene;
        let locations: Vec<String> = source_indices
            .iter()
            .map(|&ix| {
                if ix < 0 {
                    String::new()
                } else {
                    scene.textures[ix as usize]
                        .file_location
                        .to_string_lossy()
                        .to_lowercase()
                }
            })
            .collect();
        let key = format!("combine|{}|{}", tag, locations.join(";"));
        if let Some(ix) = self.by_key.get(&key) {
            return Ok(Some(*ix));
        }

        let mut inputs: Vec<Option<PixelImage>> = Vec::with_capacity(source_indices.len());
        for &ix in source_indices {
            if ix < 0 {
                inputs.push(None);
            } else {
                let texture = &scene.textures[ix as usize];
                inputs.push(Some(self.io.load(&texture.file_location)?));
            }
        }

        let width = inputs
            .iter()
            .flatten()
            .map(|i| i.width)
            .max()
            .unwrap_or(1)
            .max(1);
        let height = inputs
            .iter()
            .flatten()
            .map(|i| i.height)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut merged = PixelImage::new(width, height);
        let mut samples = vec![NEUTRAL_PIXEL; source_indices.len()];
        for y in 0..height {
            for x in 0..width {
                for (slot, input) in samples.iter_mut().zip(&inputs) {
                    *slot = match input {
                        Some(img) => img.sample_scaled(x, y, width, height),
                        None => NEUTRAL_PIXEL,
                    };
                }
                merged.set_pixel(x, y, combiner(&samples));
            }
        }

        let base = source_indices
            .iter()
            .find(|&&ix| ix >= 0)
            .map(|&ix| scene.textures[ix as usize].name.clone())
            .unwrap_or_default();
        let name = format!("{}_{}", base, tag);

        let image = if self.options.output_binary {
            let bytes = self.io.encode_png(&merged)?;
            let view = doc.raw_view(&bytes);
            json::Image {
                buffer_view: Some(view),
                mime_type: Some(json::image::MimeType("image/png".to_string())),
                name: Some(name.clone()),
                uri: None,
                extensions: Default::default(),
                extras: Default::default(),
            }
        } else {
            let file_name = format!("{}.png", name);
            self.io
                .write_png(&self.output_folder.join(&file_name), &merged)?;
            json::Image {
                buffer_view: None,
                mime_type: None,
                name: Some(name.clone()),
                uri: Some(file_name),
                extensions: Default::default(),
                extras: Default::default(),
            }
        };

        let ix = self.hold_texture(doc, name, image);
        self.by_key.insert(key, ix);
        Ok(Some(ix))
    }

    fn hold_texture(
        &mut self,
        doc: &mut GltfDocument,
        name: String,
        image: json::Image,
    ) -> json::Index<json::Texture> {
        let sampler = doc.default_sampler();
        let source = doc.images.hold(image);
        doc.textures.hold(json::Texture {
            name: Some(name),
            sampler: Some(sampler),
            source,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }
}

fn mime_for_path(path: &Path) -> Option<json::image::MimeType> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some(json::image::MimeType("image/png".to_string())),
        "jpg" | "jpeg" => Some(json::image::MimeType("image/jpeg".to_string())),
        _ => None,
    }
}
