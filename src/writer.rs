//! Document serialization: standalone JSON or the binary container

use anyhow::{Context, Result};
use gltf_json as json;
use serde::Serialize;
use std::io::{Seek, SeekFrom, Write};

use crate::document::GltfDocument;
use crate::options::GltfOptions;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;

/// Serialize the finished document to `out` and hand back the arena bytes.
pub fn write_document<W: Write + Seek>(
    out: &mut W,
    doc: GltfDocument,
    options: &GltfOptions,
    scene: json::Index<json::Scene>,
) -> Result<Vec<u8>> {
    let (root, binary) = doc.into_root(options, scene)?;
    if options.output_binary {
        write_glb(out, &root, &binary)?;
    } else {
        let text = json_string(&root, true)?;
        out.write_all(text.as_bytes())
            .context("Failed to write glTF JSON")?;
    }
    Ok(binary)
}

fn json_string(root: &json::Root, pretty: bool) -> Result<String> {
    let bytes = if pretty {
        let mut bytes = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
        root.serialize(&mut serializer)
            .context("Failed to serialize glTF JSON")?;
        bytes
    } else {
        serde_json::to_vec(root).context("Failed to serialize glTF JSON")?
    };
    String::from_utf8(bytes).context("glTF JSON is not UTF-8")
}

/// Binary container layout: 12-byte header, then a length-prefixed JSON
/// chunk padded with spaces, then a length-prefixed BIN chunk padded with
/// zeros. The three length fields are patched once the sizes are known.
fn write_glb<W: Write + Seek>(out: &mut W, root: &json::Root, binary: &[u8]) -> Result<()> {
    out.write_all(GLB_MAGIC)?;
    out.write_all(&GLB_VERSION.to_le_bytes())?;
    out.write_all(&0u32.to_le_bytes())?; // total length, written in later

    out.write_all(&0u32.to_le_bytes())?; // JSON chunk length, written in later
    out.write_all(b"JSON")?;
    let text = json_string(root, false)?;
    out.write_all(text.as_bytes())?;

    // the binary body must begin on a 4-aligned address
    let mut json_length = text.len() as u32;
    while json_length % 4 != 0 {
        out.write_all(b" ")?;
        json_length += 1;
    }

    let bin_header = 20 + json_length as u64;
    out.write_all(&0u32.to_le_bytes())?; // BIN chunk length, written in later
    out.write_all(b"BIN\0")?;
    out.write_all(binary)?;
    let mut bin_length = binary.len() as u32;
    while bin_length % 4 != 0 {
        out.write_all(&[0])?;
        bin_length += 1;
    }

    let total_length = 12 + 8 + json_length + 8 + bin_length;

    out.seek(SeekFrom::Start(8))?;
    out.write_all(&total_length.to_le_bytes())?;
    out.write_all(&json_length.to_le_bytes())?;
    out.seek(SeekFrom::Start(bin_header))?;
    out.write_all(&bin_length.to_le_bytes())?;
    out.seek(SeekFrom::End(0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn empty_root() -> json::Root {
        let mut doc = GltfDocument::new();
        let scene = doc.scenes.hold(json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Root Scene".to_string()),
            nodes: Vec::new(),
        });
        let (root, _) = doc.into_root(&GltfOptions::default(), scene).unwrap();
        root
    }

    #[test]
    fn test_pretty_json_uses_four_space_indent() {
        let text = json_string(&empty_root(), true).unwrap();
        assert!(text.starts_with("{\n    \""));
    }

    #[test]
    fn test_glb_layout_and_patched_lengths() {
        let root = empty_root();
        let binary = vec![1u8, 2, 3, 4, 5];
        let mut cursor = Cursor::new(Vec::new());
        write_glb(&mut cursor, &root, &binary).unwrap();
        let bytes = cursor.into_inner();

        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2);
        let total = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        assert_eq!(total % 4, 0);

        let json_length = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(json_length % 4, 0);
        assert_eq!(&bytes[16..20], b"JSON");

        let bin_header = 20 + json_length as usize;
        let bin_length =
            u32::from_le_bytes(bytes[bin_header..bin_header + 4].try_into().unwrap());
        assert_eq!(bin_length % 4, 0);
        assert_eq!(&bytes[bin_header + 4..bin_header + 8], b"BIN\0");
        // zero padding after the payload
        assert_eq!(&bytes[bin_header + 8..bin_header + 13], &binary[..]);
        assert_eq!(bytes[bin_header + 13], 0);
        assert_eq!(
            12 + 8 + json_length + 8 + bin_length,
            total
        );
    }

    #[test]
    fn test_json_chunk_padded_with_spaces() {
        let root = empty_root();
        let mut cursor = Cursor::new(Vec::new());
        write_glb(&mut cursor, &root, &[]).unwrap();
        let bytes = cursor.into_inner();
        let json_length = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let chunk = &bytes[20..20 + json_length];
        let text_end = chunk.iter().rposition(|&b| b == b'}').unwrap();
        assert!(chunk[text_end + 1..].iter().all(|&b| b == b' '));
    }
}
