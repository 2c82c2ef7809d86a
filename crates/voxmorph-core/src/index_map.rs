//! Frame-range correspondence between a source and a target recording.
//!
//! An [`IndexMap`] is produced by the external alignment stage, one per
//! recording pair, and consumed by the trainer. Each [`UnitSpan`] gives the
//! inclusive frame ranges of one aggregation unit on both sides. For
//! frame-level maps both ranges collapse to single frames; for label-level
//! maps they cover whole label spans.
//!
//! The binary layout is `magic "VMIM" | version u32 | unit count u32 |
//! 4 × i64 per unit`, little-endian throughout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{VcError, VcResult};

const MAGIC: [u8; 4] = *b"VMIM";
const VERSION: u32 = 1;

/// Inclusive frame ranges of one aggregation unit on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpan {
    pub source_start: i64,
    pub source_end: i64,
    pub target_start: i64,
    pub target_end: i64,
}

impl UnitSpan {
    /// A single aligned frame pair.
    pub fn frame(source: i64, target: i64) -> Self {
        Self {
            source_start: source,
            source_end: source,
            target_start: target,
            target_end: target,
        }
    }

    pub fn new(source_start: i64, source_end: i64, target_start: i64, target_end: i64) -> Self {
        Self {
            source_start,
            source_end,
            target_start,
            target_end,
        }
    }
}

/// Ordered unit correspondences for one recording pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMap {
    pub units: Vec<UnitSpan>,
}

impl IndexMap {
    pub fn new(units: Vec<UnitSpan>) -> Self {
        Self { units }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Write the map in the `.vmim` binary layout.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> VcResult<()> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&MAGIC)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&(self.units.len() as u32).to_le_bytes())?;
        for unit in &self.units {
            for v in [
                unit.source_start,
                unit.source_end,
                unit.target_start,
                unit.target_end,
            ] {
                file.write_all(&v.to_le_bytes())?;
            }
        }
        file.flush()?;
        Ok(())
    }

    /// Read a map written by [`Self::write_to_file`].
    pub fn read_from_file(path: impl AsRef<Path>) -> VcResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VcError::MissingResource {
                file: path.to_path_buf(),
                what: "index map not found".into(),
            });
        }
        let mut file = BufReader::new(File::open(path)?);
        let corrupt = |offset: u64, what: &str| VcError::corrupt(path, offset, what);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| corrupt(0, "file too short for magic"))?;
        if magic != MAGIC {
            return Err(corrupt(0, "bad magic; not an index map"));
        }
        let mut b4 = [0u8; 4];
        file.read_exact(&mut b4)
            .map_err(|_| corrupt(4, "missing version"))?;
        let version = u32::from_le_bytes(b4);
        if version != VERSION {
            return Err(corrupt(4, "unsupported index map version"));
        }
        file.read_exact(&mut b4)
            .map_err(|_| corrupt(8, "missing unit count"))?;
        let count = u32::from_le_bytes(b4) as usize;

        let mut units = Vec::with_capacity(count);
        let mut b8 = [0u8; 8];
        for i in 0..count {
            let mut values = [0i64; 4];
            for v in values.iter_mut() {
                file.read_exact(&mut b8)
                    .map_err(|_| corrupt(12 + (i as u64) * 32, "truncated unit span"))?;
                *v = i64::from_le_bytes(b8);
            }
            units.push(UnitSpan::new(values[0], values[1], values[2], values[3]));
        }
        Ok(Self { units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.vmim");
        let map = IndexMap::new(vec![
            UnitSpan::frame(0, 0),
            UnitSpan::new(3, 9, 4, 11),
            UnitSpan::new(10, 14, 12, 18),
        ]);
        map.write_to_file(&path).unwrap();
        let loaded = IndexMap::read_from_file(&path).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_missing_file() {
        let err = IndexMap::read_from_file("/nonexistent/a.vmim").unwrap_err();
        assert!(matches!(err, VcError::MissingResource { .. }));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.vmim");
        let map = IndexMap::new(vec![UnitSpan::new(0, 4, 0, 5)]);
        map.write_to_file(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        let err = IndexMap::read_from_file(&path).unwrap_err();
        assert!(matches!(err, VcError::CorruptContainer { .. }));
    }
}
