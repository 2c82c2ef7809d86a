//! Binary persistence for codebook containers.
//!
//! Layout (all integers `u32` little-endian, floats `f64` little-endian,
//! strings as `u32` length + UTF-8 bytes):
//!
//! ```text
//! magic "VMCB" | version u32 | total_entries u32 | codebook_type u32
//! vocal_tract_feature u32 | neighbours_frame_groups u32
//! neighbours_label_groups u32 | source_tag | target_tag
//! lsf_params | pitch_params | energy_params | mfcc_params
//! entry * total_entries
//! ```
//!
//! Each entry is the source item followed by the target item, each encoded
//! as `(lsf_len, lsf…, mfcc_len, mfcc…, f0, duration, energy, phoneme,
//! context)`.
//!
//! # Incremental writing
//!
//! The writer emits the header with an entry count of zero, appends entries
//! one at a time (nothing else is buffered, so training never holds the
//! whole corpus in memory), and [`CodebookFileWriter::finalize`] patches the
//! true count once at its fixed offset. A file abandoned before `finalize`
//! still has count zero and is rejected at load time, so a crash mid-training
//! cannot silently truncate readback.
//!
//! # Example
//!
//! ```no_run
//! use voxmorph_core::codebook::{CodebookEntry, SpeakerItem};
//! use voxmorph_core::codebook_file::{load_codebook, CodebookFileWriter};
//! use voxmorph_core::header::{CodebookHeader, CodebookType};
//!
//! let header = CodebookHeader::builder(CodebookType::Frames).lp_order(2).build();
//! let mut writer = CodebookFileWriter::create("/tmp/pair.vmcb", header).unwrap();
//! let item = SpeakerItem { lsf: vec![0.1, 0.2], ..Default::default() };
//! writer.append(&CodebookEntry::new(item.clone(), item)).unwrap();
//! writer.finalize().unwrap();
//!
//! let codebook = load_codebook("/tmp/pair.vmcb").unwrap();
//! assert_eq!(codebook.len(), 1);
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codebook::{Codebook, CodebookEntry, SpeakerItem};
use crate::header::{
    CodebookHeader, CodebookType, EnergyParams, LsfParams, MfccParams, PitchParams,
    VocalTractFeature,
};
use crate::types::{VcError, VcResult};

/// File magic, first four bytes of every container.
pub const MAGIC: [u8; 4] = *b"VMCB";
/// Current container format version.
pub const FORMAT_VERSION: u32 = 1;
/// Byte offset of the entry count, right after magic and version.
const COUNT_OFFSET: u64 = 8;
/// Upper bound on any length prefix; larger values mean a corrupt file.
const MAX_LEN: u32 = 1 << 24;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Incremental codebook writer.
pub struct CodebookFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    header: CodebookHeader,
    entries_written: u32,
}

impl CodebookFileWriter {
    /// Create a container file and write its header with an entry count of
    /// zero. The count becomes authoritative only after [`Self::finalize`].
    pub fn create(path: impl AsRef<Path>, header: CodebookHeader) -> VcResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = Self {
            file: BufWriter::new(file),
            path,
            header,
            entries_written: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    /// The header this writer was created with.
    pub fn header(&self) -> &CodebookHeader {
        &self.header
    }

    /// Entries appended so far.
    pub fn entries_written(&self) -> u32 {
        self.entries_written
    }

    /// Append one entry. The entry's vector lengths must agree with the
    /// header dimensions; a mismatch is fatal to the whole training run, not
    /// attributable to this entry alone.
    pub fn append(&mut self, entry: &CodebookEntry) -> VcResult<()> {
        let lp = self.header.lsf_params.lp_order as usize;
        let mfcc = self.header.mfcc_params.dimension as usize;
        for (side, item) in [("source", &entry.source), ("target", &entry.target)] {
            if item.lsf.len() != lp {
                return Err(VcError::dims(format!("append {side} lsf"), lp, item.lsf.len()));
            }
            if item.mfcc.len() != mfcc {
                return Err(VcError::dims(format!("append {side} mfcc"), mfcc, item.mfcc.len()));
            }
        }
        self.write_item(&entry.source)?;
        self.write_item(&entry.target)?;
        self.entries_written += 1;
        Ok(())
    }

    /// Patch the entry count into the header, flush, and close the file.
    pub fn finalize(mut self) -> VcResult<u32> {
        let count = self.entries_written;
        self.file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        self.file.write_all(&count.to_le_bytes())?;
        self.file.flush()?;
        Ok(count)
    }

    fn write_header(&mut self) -> VcResult<()> {
        self.file.write_all(&MAGIC)?;
        self.write_u32(FORMAT_VERSION)?;
        self.write_u32(0)?; // entry count, patched by finalize
        self.write_u32(self.header.codebook_type.as_u32())?;
        self.write_u32(self.header.vocal_tract_feature.as_u32())?;
        self.write_u32(self.header.num_neighbours_in_frame_groups)?;
        self.write_u32(self.header.num_neighbours_in_label_groups)?;
        let source_tag = self.header.source_tag.clone();
        let target_tag = self.header.target_tag.clone();
        self.write_string(&source_tag)?;
        self.write_string(&target_tag)?;
        let h = self.header.clone();
        self.write_u32(h.lsf_params.sampling_rate_hz)?;
        self.write_u32(h.lsf_params.lp_order)?;
        self.write_f64(h.lsf_params.window_size_s)?;
        self.write_f64(h.lsf_params.skip_size_s)?;
        self.write_u32(h.pitch_params.sampling_rate_hz)?;
        self.write_f64(h.pitch_params.window_size_s)?;
        self.write_f64(h.pitch_params.skip_size_s)?;
        self.write_f64(h.pitch_params.f0_min_hz)?;
        self.write_f64(h.pitch_params.f0_max_hz)?;
        self.write_f64(h.energy_params.window_size_s)?;
        self.write_f64(h.energy_params.skip_size_s)?;
        self.write_u32(h.mfcc_params.sampling_rate_hz)?;
        self.write_u32(h.mfcc_params.dimension)?;
        self.write_f64(h.mfcc_params.window_size_s)?;
        self.write_f64(h.mfcc_params.skip_size_s)?;
        Ok(())
    }

    fn write_item(&mut self, item: &SpeakerItem) -> VcResult<()> {
        self.write_vec(&item.lsf)?;
        self.write_vec(&item.mfcc)?;
        self.write_f64(item.f0)?;
        self.write_f64(item.duration)?;
        self.write_f64(item.energy)?;
        let phoneme = item.phoneme.clone();
        let context = item.context.clone();
        self.write_string(&phoneme)?;
        self.write_string(&context)?;
        Ok(())
    }

    fn write_u32(&mut self, v: u32) -> VcResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_f64(&mut self, v: f64) -> VcResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_vec(&mut self, v: &[f64]) -> VcResult<()> {
        self.write_u32(v.len() as u32)?;
        for &x in v {
            self.write_f64(x)?;
        }
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> VcResult<()> {
        self.write_u32(s.len() as u32)?;
        self.file.write_all(s.as_bytes())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Codebook reader. Opens and validates the header eagerly; entries are read
/// on demand or all at once.
#[derive(Debug)]
pub struct CodebookFileReader {
    file: BufReader<File>,
    path: PathBuf,
    header: CodebookHeader,
    offset: u64,
    entries_read: u32,
}

impl CodebookFileReader {
    /// Open a container and read its header. Fails with
    /// [`VcError::MissingResource`] when the file does not exist and
    /// [`VcError::CorruptContainer`] on a malformed header, including the
    /// count-zero-with-trailing-bytes shape left behind by a writer that
    /// never finalized.
    pub fn open(path: impl AsRef<Path>) -> VcResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(VcError::MissingResource {
                file: path,
                what: "codebook container not found".into(),
            });
        }
        let len = std::fs::metadata(&path)?.len();
        let file = BufReader::new(File::open(&path)?);
        let mut reader = Self {
            file,
            path,
            header: CodebookHeader::builder(CodebookType::Frames).build(),
            offset: 0,
            entries_read: 0,
        };
        reader.header = reader.read_header()?;
        if reader.header.total_entries == 0 && reader.offset < len {
            return Err(VcError::corrupt(
                &reader.path,
                reader.offset,
                "entry count is zero but entry data follows; writer never finalized",
            ));
        }
        Ok(reader)
    }

    pub fn header(&self) -> &CodebookHeader {
        &self.header
    }

    /// Read the next entry. Returns `None` once `total_entries` have been
    /// consumed.
    pub fn read_entry(&mut self) -> VcResult<Option<CodebookEntry>> {
        if self.entries_read >= self.header.total_entries {
            return Ok(None);
        }
        let source = self.read_item()?;
        let target = self.read_item()?;
        self.entries_read += 1;
        Ok(Some(CodebookEntry::new(source, target)))
    }

    /// Read exactly `total_entries` entries and return the full container.
    pub fn read_all(mut self) -> VcResult<Codebook> {
        let mut entries = Vec::with_capacity(self.header.total_entries as usize);
        while let Some(entry) = self.read_entry()? {
            entries.push(entry);
        }
        let codebook = Codebook::new(self.header, entries);
        codebook.validate()?;
        Ok(codebook)
    }

    fn read_header(&mut self) -> VcResult<CodebookHeader> {
        let mut magic = [0u8; 4];
        self.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(self.corrupt(0, "bad magic; not a codebook container"));
        }
        let version = self.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(self.corrupt(4, format!("unsupported format version {version}")));
        }
        let total_entries = self.read_u32()?;
        let type_raw = self.read_u32()?;
        let codebook_type = CodebookType::from_u32(type_raw)
            .ok_or_else(|| self.corrupt(self.offset - 4, format!("bad codebook type {type_raw}")))?;
        let feature_raw = self.read_u32()?;
        let vocal_tract_feature = VocalTractFeature::from_u32(feature_raw).ok_or_else(|| {
            self.corrupt(self.offset - 4, format!("bad vocal tract feature {feature_raw}"))
        })?;
        let num_neighbours_in_frame_groups = self.read_u32()?;
        let num_neighbours_in_label_groups = self.read_u32()?;
        let source_tag = self.read_string()?;
        let target_tag = self.read_string()?;
        let lsf_params = LsfParams {
            sampling_rate_hz: self.read_u32()?,
            lp_order: self.read_u32()?,
            window_size_s: self.read_f64()?,
            skip_size_s: self.read_f64()?,
        };
        let pitch_params = PitchParams {
            sampling_rate_hz: self.read_u32()?,
            window_size_s: self.read_f64()?,
            skip_size_s: self.read_f64()?,
            f0_min_hz: self.read_f64()?,
            f0_max_hz: self.read_f64()?,
        };
        let energy_params = EnergyParams {
            window_size_s: self.read_f64()?,
            skip_size_s: self.read_f64()?,
        };
        let mfcc_params = MfccParams {
            sampling_rate_hz: self.read_u32()?,
            dimension: self.read_u32()?,
            window_size_s: self.read_f64()?,
            skip_size_s: self.read_f64()?,
        };
        Ok(CodebookHeader {
            total_entries,
            codebook_type,
            vocal_tract_feature,
            num_neighbours_in_frame_groups,
            num_neighbours_in_label_groups,
            source_tag,
            target_tag,
            lsf_params,
            pitch_params,
            energy_params,
            mfcc_params,
        })
    }

    fn read_item(&mut self) -> VcResult<SpeakerItem> {
        let lsf = self.read_vec()?;
        let expected_lp = self.header.lsf_params.lp_order as usize;
        if lsf.len() != expected_lp {
            return Err(VcError::dims(
                format!("entry {} lsf in {:?}", self.entries_read, self.path),
                expected_lp,
                lsf.len(),
            ));
        }
        let mfcc = self.read_vec()?;
        let expected_mfcc = self.header.mfcc_params.dimension as usize;
        if mfcc.len() != expected_mfcc {
            return Err(VcError::dims(
                format!("entry {} mfcc in {:?}", self.entries_read, self.path),
                expected_mfcc,
                mfcc.len(),
            ));
        }
        Ok(SpeakerItem {
            lsf,
            mfcc,
            f0: self.read_f64()?,
            duration: self.read_f64()?,
            energy: self.read_f64()?,
            phoneme: self.read_string()?,
            context: self.read_string()?,
        })
    }

    fn corrupt(&self, offset: u64, what: impl Into<String>) -> VcError {
        VcError::corrupt(&self.path, offset, what)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> VcResult<()> {
        match self.file.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(self.corrupt(
                self.offset,
                "unexpected end of file; container shorter than header implies",
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn read_u32(&mut self) -> VcResult<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_f64(&mut self) -> VcResult<f64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    fn read_vec(&mut self) -> VcResult<Vec<f64>> {
        let len = self.read_u32()?;
        if len > MAX_LEN {
            return Err(self.corrupt(self.offset - 4, format!("implausible vector length {len}")));
        }
        let mut v = Vec::with_capacity(len as usize);
        for _ in 0..len {
            v.push(self.read_f64()?);
        }
        Ok(v)
    }

    fn read_string(&mut self) -> VcResult<String> {
        let len = self.read_u32()?;
        if len > MAX_LEN {
            return Err(self.corrupt(self.offset - 4, format!("implausible string length {len}")));
        }
        let mut bytes = vec![0u8; len as usize];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|_| self.corrupt(self.offset - len as u64, "string is not valid UTF-8"))
    }
}

/// Load a full codebook from disk.
pub fn load_codebook(path: impl AsRef<Path>) -> VcResult<Codebook> {
    CodebookFileReader::open(path)?.read_all()
}

/// Persist a full in-memory codebook (header rewritten with the actual
/// entry count).
pub fn save_codebook(path: impl AsRef<Path>, codebook: &Codebook) -> VcResult<()> {
    let mut writer = CodebookFileWriter::create(path, codebook.header.clone())?;
    for entry in &codebook.entries {
        writer.append(entry)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::CodebookType;

    fn item(lsf: &[f64], phn: &str) -> SpeakerItem {
        SpeakerItem {
            lsf: lsf.to_vec(),
            mfcc: vec![],
            f0: 123.25,
            duration: 0.0625,
            energy: 0.5,
            phoneme: phn.to_string(),
            context: format!("sil|{phn}|sil"),
        }
    }

    fn header() -> CodebookHeader {
        CodebookHeader::builder(CodebookType::FrameGroups)
            .source_tag("neutral")
            .target_tag("angry")
            .lp_order(3)
            .sampling_rate_hz(16_000)
            .build()
    }

    #[test]
    fn test_round_trip_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.vmcb");

        let entries = vec![
            CodebookEntry::new(item(&[0.1, 0.2, 0.3], "a"), item(&[0.4, 0.5, 0.6], "a")),
            CodebookEntry::new(item(&[0.7, 0.8, 0.9], "e"), item(&[1.0, 1.1, 1.2], "e")),
        ];

        let mut writer = CodebookFileWriter::create(&path, header()).unwrap();
        for e in &entries {
            writer.append(e).unwrap();
        }
        assert_eq!(writer.entries_written(), 2);
        writer.finalize().unwrap();

        let codebook = load_codebook(&path).unwrap();
        assert_eq!(codebook.header.total_entries, 2);
        assert_eq!(codebook.header.source_tag, "neutral");
        assert_eq!(codebook.header.target_tag, "angry");
        // Exact float equality across the round trip.
        assert_eq!(codebook.entries, entries);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.vmcb");

        let mut writer = CodebookFileWriter::create(&path, header()).unwrap();
        writer
            .append(&CodebookEntry::new(
                item(&[0.1, 0.2, 0.3], "a"),
                item(&[0.4, 0.5, 0.6], "a"),
            ))
            .unwrap();
        writer.finalize().unwrap();

        // Chop off the last 16 bytes.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 16]).unwrap();

        let err = load_codebook(&path).unwrap_err();
        assert!(matches!(err, VcError::CorruptContainer { .. }), "{err}");
    }

    #[test]
    fn test_unfinalized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unfinalized.vmcb");

        let mut writer = CodebookFileWriter::create(&path, header()).unwrap();
        writer
            .append(&CodebookEntry::new(
                item(&[0.1, 0.2, 0.3], "a"),
                item(&[0.4, 0.5, 0.6], "a"),
            ))
            .unwrap();
        // Dropped without finalize: count stays zero but entry bytes follow.
        drop(writer);

        let err = CodebookFileReader::open(&path).unwrap_err();
        assert!(matches!(err, VcError::CorruptContainer { .. }), "{err}");
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vmcb");
        std::fs::write(&path, b"NOPE0000000000000000000000000000").unwrap();
        let err = CodebookFileReader::open(&path).unwrap_err();
        assert!(matches!(err, VcError::CorruptContainer { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CodebookFileReader::open("/nonexistent/x.vmcb").unwrap_err();
        assert!(matches!(err, VcError::MissingResource { .. }));
    }

    #[test]
    fn test_append_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dims.vmcb");
        let mut writer = CodebookFileWriter::create(&path, header()).unwrap();
        let err = writer
            .append(&CodebookEntry::new(
                item(&[0.1, 0.2], "a"), // lp order 2, header says 3
                item(&[0.4, 0.5, 0.6], "a"),
            ))
            .unwrap_err();
        assert!(matches!(err, VcError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_codebook_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.vmcb");
        let writer = CodebookFileWriter::create(&path, header()).unwrap();
        writer.finalize().unwrap();
        let codebook = load_codebook(&path).unwrap();
        assert!(codebook.is_empty());
    }

    #[test]
    fn test_streaming_read_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.vmcb");
        let mut writer = CodebookFileWriter::create(&path, header()).unwrap();
        for _ in 0..3 {
            writer
                .append(&CodebookEntry::new(
                    item(&[0.1, 0.2, 0.3], "a"),
                    item(&[0.4, 0.5, 0.6], "a"),
                ))
                .unwrap();
        }
        writer.finalize().unwrap();

        let mut reader = CodebookFileReader::open(&path).unwrap();
        let mut n = 0;
        while let Some(_entry) = reader.read_entry().unwrap() {
            n += 1;
        }
        assert_eq!(n, 3);
    }
}
