use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use cqdb::CQDBWriter;
use tempfile::NamedTempFile;

use crate::alphabet::Alphabet;
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureRefs};
use crate::model::{Metadata, FORMAT_VERSION, MAGIC, MODEL_TYPE};

/// Borrowed view of everything that goes into a model file
pub(crate) struct ModelParts<'a> {
    pub features: &'a [Feature],
    pub labels: &'a Alphabet,
    pub attrs: &'a Alphabet,
    pub label_refs: &'a [FeatureRefs],
    pub attr_refs: &'a [FeatureRefs],
    pub metadata: &'a Metadata,
}

#[derive(Debug, Default)]
struct Offsets {
    features: u32,
    labels: u32,
    attrs: u32,
    label_refs: u32,
    attr_refs: u32,
    size: u32,
}

fn to_u32<T: TryInto<u32>>(value: T, what: &str) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| Error::format(format!("{} exceeds u32::MAX", what)))
}

fn position<W: Seek>(w: &mut W) -> Result<u32> {
    to_u32(w.stream_position()?, "file position")
}

/// Serializer for the CRFsuite-compatible model layout
pub(crate) struct ModelWriter;

impl ModelWriter {
    /// Serialize a model into memory
    pub fn to_bytes(parts: &ModelParts<'_>) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        Self::write(&mut cursor, parts)?;
        Ok(cursor.into_inner())
    }

    /// Serialize a model into a seekable stream positioned at its start
    pub fn write<W: Write + Seek>(w: &mut W, parts: &ModelParts<'_>) -> Result<()> {
        let start = w.stream_position()?;

        // Header placeholder, rewritten once the offsets are known
        Self::write_header(w, parts, &Offsets::default())?;

        let mut offsets = Offsets {
            features: position(w)?,
            ..Default::default()
        };
        Self::write_features(w, parts.features)?;

        offsets.labels = position(w)?;
        Self::write_cqdb(w, parts.labels)?;

        offsets.attrs = position(w)?;
        Self::write_cqdb(w, parts.attrs)?;

        Self::align_to_u32(w)?;
        offsets.label_refs = position(w)?;
        // Two extra slots for BOS/EOS, left empty
        Self::write_refs(w, b"LFRF", parts.label_refs, parts.label_refs.len() + 2)?;

        Self::align_to_u32(w)?;
        offsets.attr_refs = position(w)?;
        Self::write_refs(w, b"AFRF", parts.attr_refs, parts.attr_refs.len())?;

        Self::write_metadata(w, parts.metadata)?;

        offsets.size = position(w)?;
        w.seek(SeekFrom::Start(start))?;
        Self::write_header(w, parts, &offsets)?;
        w.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Align the stream position to a 4-byte boundary with zero padding.
    fn align_to_u32<W: Write + Seek>(w: &mut W) -> Result<()> {
        let pos = w.stream_position()?;
        let padding = (4 - pos % 4) % 4;
        for _ in 0..padding {
            w.write_all(&[0])?;
        }
        Ok(())
    }

    fn write_header<W: Write>(w: &mut W, parts: &ModelParts<'_>, offsets: &Offsets) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&offsets.size.to_le_bytes())?;
        w.write_all(MODEL_TYPE)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&to_u32(parts.features.len(), "number of features")?.to_le_bytes())?;
        w.write_all(&to_u32(parts.labels.len(), "number of labels")?.to_le_bytes())?;
        w.write_all(&to_u32(parts.attrs.len(), "number of attributes")?.to_le_bytes())?;
        w.write_all(&offsets.features.to_le_bytes())?;
        w.write_all(&offsets.labels.to_le_bytes())?;
        w.write_all(&offsets.attrs.to_le_bytes())?;
        w.write_all(&offsets.label_refs.to_le_bytes())?;
        w.write_all(&offsets.attr_refs.to_le_bytes())?;
        Ok(())
    }

    fn write_features<W: Write>(w: &mut W, features: &[Feature]) -> Result<()> {
        let num_features = to_u32(features.len(), "number of features")?;
        let chunk_size = to_u32(12 + 20 * u64::from(num_features), "feature chunk size")?;
        w.write_all(b"FEAT")?;
        w.write_all(&chunk_size.to_le_bytes())?;
        w.write_all(&num_features.to_le_bytes())?;

        for feature in features {
            w.write_all(&(feature.ftype as u32).to_le_bytes())?;
            w.write_all(&feature.src.to_le_bytes())?;
            w.write_all(&feature.dst.to_le_bytes())?;
            w.write_all(&feature.weight.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_cqdb<W: Write + Seek>(w: &mut W, alphabet: &Alphabet) -> Result<()> {
        let mut writer = CQDBWriter::new(&mut *w)?;
        for (s, id) in alphabet.iter() {
            writer.put(s, id)?;
        }
        // The database is flushed when the writer is dropped.
        drop(writer);
        Ok(())
    }

    /// Write a reference chunk: offset table followed by id lists.
    ///
    /// `num_slots` may exceed `refs.len()`; the extra slots get offset zero.
    fn write_refs<W: Write + Seek>(
        w: &mut W,
        chunk: &[u8; 4],
        refs: &[FeatureRefs],
        num_slots: usize,
    ) -> Result<()> {
        let chunk_start = position(w)?;
        let num_slots_u32 = to_u32(num_slots, "number of reference slots")?;
        let table_size = to_u32(12 + 4 * u64::from(num_slots_u32), "reference table size")?;

        let mut offsets = vec![0u32; num_slots];
        let mut current = u64::from(chunk_start) + u64::from(table_size);
        for (slot, refs) in offsets.iter_mut().zip(refs) {
            *slot = to_u32(current, "reference offset")?;
            current += 4 + 4 * refs.len() as u64;
        }
        let chunk_size = to_u32(current - u64::from(chunk_start), "reference chunk size")?;

        w.write_all(chunk)?;
        w.write_all(&chunk_size.to_le_bytes())?;
        w.write_all(&num_slots_u32.to_le_bytes())?;
        for offset in &offsets {
            w.write_all(&offset.to_le_bytes())?;
        }
        for refs in refs {
            w.write_all(&to_u32(refs.len(), "reference count")?.to_le_bytes())?;
            for fid in &refs.fids {
                w.write_all(&fid.to_le_bytes())?;
            }
        }
        Ok(())
    }

    fn write_metadata<W: Write + Seek>(w: &mut W, metadata: &Metadata) -> Result<()> {
        let mut body = Vec::new();
        write_string(&mut body, metadata.algorithm.as_deref().unwrap_or(""))?;
        body.extend_from_slice(&to_u32(metadata.params.len(), "number of parameters")?.to_le_bytes());
        for (name, value) in &metadata.params {
            write_string(&mut body, name)?;
            write_string(&mut body, value)?;
        }
        let padding = (4 - body.len() % 4) % 4;
        body.resize(body.len() + padding, 0);

        w.write_all(b"META")?;
        w.write_all(&to_u32(8 + body.len(), "metadata chunk size")?.to_le_bytes())?;
        w.write_all(&body)?;
        Ok(())
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    buf.extend_from_slice(&to_u32(s.len(), "string length")?.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// The destination is only replaced once the data is fully on disk.
pub(crate) fn persist_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureType;

    fn parts_fixture() -> (Vec<Feature>, Alphabet, Alphabet, Vec<FeatureRefs>, Vec<FeatureRefs>, Metadata) {
        let features = vec![
            Feature { ftype: FeatureType::State, src: 0, dst: 1, weight: 0.5 },
            Feature { ftype: FeatureType::Transition, src: 1, dst: 0, weight: -0.25 },
        ];
        let labels: Alphabet = ["B", "I"].iter().collect();
        let attrs: Alphabet = ["w=the"].iter().collect();
        let label_refs = vec![FeatureRefs::default(), FeatureRefs { fids: vec![1] }];
        let attr_refs = vec![FeatureRefs { fids: vec![0] }];
        let metadata = Metadata {
            algorithm: Some("lbfgs".to_string()),
            params: vec![("c2".to_string(), "1".to_string())],
        };
        (features, labels, attrs, label_refs, attr_refs, metadata)
    }

    #[test]
    fn test_layout() {
        let (features, labels, attrs, label_refs, attr_refs, metadata) = parts_fixture();
        let parts = ModelParts {
            features: &features,
            labels: &labels,
            attrs: &attrs,
            label_refs: &label_refs,
            attr_refs: &attr_refs,
            metadata: &metadata,
        };
        let bytes = ModelWriter::to_bytes(&parts).unwrap();

        assert_eq!(&bytes[0..4], b"lCRF");
        let size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(size as usize, bytes.len());
        assert_eq!(&bytes[8..12], b"FOMC");
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 100);
        // Features start right after the 48-byte header.
        let off_features = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;
        assert_eq!(off_features, 48);
        assert_eq!(&bytes[48..52], b"FEAT");
        let off_label_refs = u32::from_le_bytes(bytes[40..44].try_into().unwrap()) as usize;
        assert_eq!(off_label_refs % 4, 0);
        assert_eq!(&bytes[off_label_refs..off_label_refs + 4], b"LFRF");
    }

    #[test]
    fn test_persist_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.crfsuite");
        std::fs::write(&path, b"old").unwrap();
        persist_atomic(&path, b"new contents").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
        // Only the destination remains in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
