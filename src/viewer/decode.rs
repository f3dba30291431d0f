//! glTF decoders, from strictest to most forgiving.

use gltf::Gltf;
use serde_json::Value;
use thiserror::Error;

use super::loader::ModelDecoder;
use super::scene::{Aabb, LoadedModel};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid glTF: {0}")]
    Invalid(String),

    #[error("truncated GLB container: {0}")]
    Truncated(String),

    #[error("scene has no meshes")]
    Empty,
}

/// Validating decoder that also resolves buffers and reads vertex data
pub struct FullGltfDecoder;

impl ModelDecoder for FullGltfDecoder {
    fn name(&self) -> &'static str {
        "gltf-full"
    }

    fn decode(&self, bytes: &[u8]) -> Result<LoadedModel, DecodeError> {
        let (document, buffers, _images) =
            gltf::import_slice(bytes).map_err(|e| DecodeError::Invalid(e.to_string()))?;

        let mut model = LoadedModel {
            textures: document.textures().count(),
            ..Default::default()
        };

        for mesh in document.meshes() {
            model.meshes += 1;
            for primitive in mesh.primitives() {
                model.primitives += 1;
                let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
                if let Some(positions) = reader.read_positions() {
                    for position in positions {
                        model.vertices += 1;
                        model.bounds = Some(match model.bounds {
                            Some(bounds) => bounds.include(position),
                            None => Aabb::point(position),
                        });
                    }
                }
            }
        }

        finish(model)
    }
}

/// Parses the document without validation and trusts accessor metadata
pub struct LenientGltfDecoder;

impl ModelDecoder for LenientGltfDecoder {
    fn name(&self) -> &'static str {
        "gltf-lenient"
    }

    fn decode(&self, bytes: &[u8]) -> Result<LoadedModel, DecodeError> {
        let gltf = Gltf::from_slice_without_validation(bytes)
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        let document = &gltf.document;

        let mut model = LoadedModel {
            textures: document.textures().count(),
            ..Default::default()
        };

        for mesh in document.meshes() {
            model.meshes += 1;
            for primitive in mesh.primitives() {
                model.primitives += 1;
                if let Some(accessor) = primitive.get(&gltf::Semantic::Positions) {
                    model.vertices += accessor.count();
                    let bounds = accessor
                        .min()
                        .zip(accessor.max())
                        .and_then(|(min, max)| Aabb::from_json(&min, &max));
                    model.bounds = Aabb::merge(model.bounds, bounds);
                }
            }
        }

        finish(model)
    }
}

/// Reads the GLB header and JSON chunk directly. Also accepts plain `.gltf`.
pub struct ContainerDecoder;

impl ModelDecoder for ContainerDecoder {
    fn name(&self) -> &'static str {
        "glb-container"
    }

    fn decode(&self, bytes: &[u8]) -> Result<LoadedModel, DecodeError> {
        let json = container_json(bytes)?;
        let root: Value =
            serde_json::from_slice(json).map_err(|e| DecodeError::Invalid(e.to_string()))?;

        let empty = Vec::new();
        let accessors = root["accessors"].as_array().unwrap_or(&empty);
        let meshes = root["meshes"].as_array().unwrap_or(&empty);

        let mut model = LoadedModel {
            meshes: meshes.len(),
            textures: root["textures"].as_array().map_or(0, |t| t.len()),
            ..Default::default()
        };

        for mesh in meshes {
            let primitives = mesh["primitives"].as_array().unwrap_or(&empty);
            model.primitives += primitives.len();
            for primitive in primitives {
                let accessor = primitive["attributes"]["POSITION"]
                    .as_u64()
                    .and_then(|index| accessors.get(index as usize));
                if let Some(accessor) = accessor {
                    model.vertices += accessor["count"].as_u64().unwrap_or(0) as usize;
                    let bounds = Aabb::from_json(&accessor["min"], &accessor["max"]);
                    model.bounds = Aabb::merge(model.bounds, bounds);
                }
            }
        }

        finish(model)
    }
}

fn finish(model: LoadedModel) -> Result<LoadedModel, DecodeError> {
    if model.meshes == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(model)
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// The JSON document inside a GLB, or the whole input for plain glTF
fn container_json(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if !bytes.starts_with(GLB_MAGIC) {
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        return match first {
            Some(b'{') => Ok(bytes),
            _ => Err(DecodeError::Invalid("neither GLB nor glTF JSON".to_string())),
        };
    }

    let declared = read_u32(bytes, 8)
        .ok_or_else(|| DecodeError::Truncated("header".to_string()))? as usize;
    if declared > bytes.len() {
        return Err(DecodeError::Truncated(format!(
            "declares {} bytes, got {}",
            declared,
            bytes.len()
        )));
    }

    let chunk_len = read_u32(bytes, GLB_HEADER_LEN)
        .ok_or_else(|| DecodeError::Truncated("chunk header".to_string()))? as usize;
    let chunk_type = read_u32(bytes, GLB_HEADER_LEN + 4)
        .ok_or_else(|| DecodeError::Truncated("chunk header".to_string()))?;
    if chunk_type != CHUNK_JSON {
        return Err(DecodeError::Invalid(format!(
            "first chunk is {:#010x}, expected JSON",
            chunk_type
        )));
    }

    let start = GLB_HEADER_LEN + CHUNK_HEADER_LEN;
    bytes
        .get(start..start + chunk_len)
        .ok_or_else(|| DecodeError::Truncated("JSON chunk".to_string()))
}

/// Pack a JSON document and binary buffer into a GLB container
pub fn glb_container(json: &Value, bin: &[u8]) -> Vec<u8> {
    let mut json_chunk = json.to_string().into_bytes();
    while json_chunk.len() % 4 != 0 {
        json_chunk.push(b' ');
    }
    let mut bin_chunk = bin.to_vec();
    while bin_chunk.len() % 4 != 0 {
        bin_chunk.push(0);
    }

    let mut total = GLB_HEADER_LEN + CHUNK_HEADER_LEN + json_chunk.len();
    if !bin_chunk.is_empty() {
        total += CHUNK_HEADER_LEN + bin_chunk.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);
    if !bin_chunk.is_empty() {
        out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin_chunk);
    }
    out
}

/// One triangle spanning (0,0,0)..(1,1,0), used to self-test decoders
pub fn minimal_glb() -> Vec<u8> {
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let bin: Vec<u8> = positions
        .iter()
        .flatten()
        .flat_map(|v| v.to_le_bytes())
        .collect();

    let json = serde_json::json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
        "buffers": [{ "byteLength": bin.len() }],
        "bufferViews": [{ "buffer": 0, "byteOffset": 0, "byteLength": bin.len(), "target": 34962 }],
        "accessors": [{
            "bufferView": 0,
            "componentType": 5126,
            "count": 3,
            "type": "VEC3",
            "min": [0.0, 0.0, 0.0],
            "max": [1.0, 1.0, 0.0]
        }]
    });

    glb_container(&json, &bin)
}
