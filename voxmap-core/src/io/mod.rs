use crate::geometry::grid::GridIndex;
use crate::geometry::octree_index::OctreeIndex;
use crate::geometry::point::{FloatingPoint, IndexElement};
use crate::map::chunked::HashedChunkedWaveletOctree;
use crate::map::hashed_blocks::HashedBlocks;
use crate::map::hashed_wavelet_octree::{HashedWaveletOctree, MapConfig};
use crate::map::variant::Map;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"VXMP";
const FORMAT_VERSION: u16 = 1;
const FILE_EXTENSION: &str = "vxm";

/// Fixed-point scale used when maps are saved without floating point
/// precision: values are stored as `round(value * 2^9)` in an i16.
const FIXED_RADIX_SCALE: FloatingPoint = 512.0;

#[derive(Debug, Error)]
pub enum MapIoError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("invalid map file: {0}")]
    DataFormat(String),

    #[error("map was saved with use_float = {actual}, but was loaded with used_float = {expected}")]
    PrecisionMismatch { expected: bool, actual: bool },

    #[error("serialization failed")]
    Serialization(#[from] bincode::Error),
}

#[derive(Serialize, Deserialize)]
enum LeafValues {
    Float(Vec<(IndexElement, GridIndex, FloatingPoint)>),
    Fixed(Vec<(IndexElement, GridIndex, i16)>),
}

#[derive(Serialize, Deserialize)]
enum MapSnapshot {
    Dense {
        min_cell_width: FloatingPoint,
        default_value: FloatingPoint,
        leaves: LeafValues,
    },
    Wavelet {
        config: MapConfig,
        leaves: LeafValues,
    },
    ChunkedWavelet {
        config: MapConfig,
        leaves: LeafValues,
    },
}

fn map_file_path(path_prefix: &Path) -> PathBuf {
    let mut path = path_prefix.as_os_str().to_owned();
    path.push(".");
    path.push(FILE_EXTENSION);
    PathBuf::from(path)
}

fn collect_leaves(map: &Map, use_float: bool) -> LeafValues {
    if use_float {
        let mut leaves = Vec::new();
        map.for_each_leaf(|index, value| leaves.push((index.height, index.position, value)));
        LeafValues::Float(leaves)
    } else {
        let mut leaves = Vec::new();
        map.for_each_leaf(|index, value| {
            let quantized = (value * FIXED_RADIX_SCALE)
                .round()
                .clamp(i16::MIN as FloatingPoint, i16::MAX as FloatingPoint)
                as i16;
            leaves.push((index.height, index.position, quantized));
        });
        LeafValues::Fixed(leaves)
    }
}

fn restore_leaves(map: &mut Map, leaves: LeafValues) {
    match leaves {
        LeafValues::Float(leaves) => {
            for (height, position, value) in leaves {
                map.set_cell_value(OctreeIndex::new(height, position), value);
            }
        }
        LeafValues::Fixed(leaves) => {
            for (height, position, quantized) in leaves {
                let value = quantized as FloatingPoint / FIXED_RADIX_SCALE;
                map.set_cell_value(OctreeIndex::new(height, position), value);
            }
        }
    }
}

/// Saves the map's observable state to `<path_prefix>.vxm`.
///
/// With `use_float` the leaf values round-trip exactly; without it they
/// are quantized to a 16 bit fixed-radix representation.
pub fn save_map(map: &Map, path_prefix: &Path, use_float: bool) -> Result<(), MapIoError> {
    let leaves = collect_leaves(map, use_float);
    let snapshot = match map {
        Map::HashedBlocks(map) => MapSnapshot::Dense {
            min_cell_width: map.min_cell_width(),
            default_value: map.default_value(),
            leaves,
        },
        Map::HashedWaveletOctree(map) => MapSnapshot::Wavelet {
            config: *map.config(),
            leaves,
        },
        Map::HashedChunkedWaveletOctree(map) => MapSnapshot::ChunkedWavelet {
            config: *map.config(),
            leaves,
        },
    };

    let file = File::create(map_file_path(path_prefix))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u8(use_float as u8)?;
    bincode::serialize_into(&mut writer, &snapshot)?;
    writer.flush()?;
    Ok(())
}

/// Loads a map previously written with [save_map].
/// `used_float` must match the precision the file was saved with.
pub fn load_map(path_prefix: &Path, used_float: bool) -> Result<Map, MapIoError> {
    let file = File::open(map_file_path(path_prefix))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(MapIoError::DataFormat("bad magic bytes".to_string()));
    }
    let version = reader.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(MapIoError::DataFormat(format!(
            "unsupported format version {version}"
        )));
    }
    let saved_with_float = reader.read_u8()? != 0;
    if saved_with_float != used_float {
        return Err(MapIoError::PrecisionMismatch {
            expected: used_float,
            actual: saved_with_float,
        });
    }

    let snapshot: MapSnapshot = bincode::deserialize_from(&mut reader)?;
    let (mut map, leaves) = match snapshot {
        MapSnapshot::Dense {
            min_cell_width,
            default_value,
            leaves,
        } => (
            Map::HashedBlocks(HashedBlocks::new(min_cell_width, default_value)),
            leaves,
        ),
        MapSnapshot::Wavelet { config, leaves } => (
            Map::HashedWaveletOctree(HashedWaveletOctree::new(config)),
            leaves,
        ),
        MapSnapshot::ChunkedWavelet { config, leaves } => (
            Map::HashedChunkedWaveletOctree(HashedChunkedWaveletOctree::new(config)),
            leaves,
        ),
    };
    restore_leaves(&mut map, leaves);
    Ok(map)
}
