use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use bstr::ByteSlice;
use cqdb::CQDB;

use crate::alphabet::Alphabet;
use crate::attribute::Attribute;
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureRefs, FeatureType};
use crate::model_writer::{persist_atomic, ModelParts, ModelWriter};
use crate::tagger::Tagger;

pub(crate) const MAGIC: &[u8; 4] = b"lCRF";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"FOMC";
pub(crate) const FORMAT_VERSION: u32 = 100;

const HEADER_SIZE: usize = 48;
const CHUNK_SIZE: usize = 12;
const FEATURE_SIZE: usize = 20;

#[inline]
fn unpack_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::format(format!("unexpected end of data at offset {:#X}", offset)))
}

#[inline]
fn unpack_f64(buf: &[u8], offset: usize) -> Result<f64> {
    buf.get(offset..offset + 8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| Error::format(format!("unexpected end of data at offset {:#X}", offset)))
}

fn unpack_chunk(buf: &[u8], offset: usize, name: &[u8; 4]) -> Result<()> {
    match buf.get(offset..offset + 4) {
        Some(tag) if tag == name => Ok(()),
        _ => Err(Error::format(format!(
            "missing {} chunk at offset {:#X}",
            name.as_bstr(),
            offset
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    magic: [u8; 4],
    size: u32,
    r#type: [u8; 4],
    version: u32,
    num_features: u32,
    num_labels: u32,
    num_attrs: u32,
    off_features: u32,
    off_labels: u32,
    off_attrs: u32,
    off_label_refs: u32,
    off_attr_refs: u32,
}

impl Header {
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::format("model data is shorter than the file header"));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if &magic != MAGIC {
            return Err(Error::format("magic mismatch"));
        }
        let mut r#type = [0u8; 4];
        r#type.copy_from_slice(&buf[8..12]);
        if &r#type != MODEL_TYPE {
            return Err(Error::format(format!(
                "unsupported model type {:?}",
                r#type.as_bstr()
            )));
        }
        let version = unpack_u32(buf, 12)?;
        if version != FORMAT_VERSION {
            return Err(Error::format(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        Ok(Self {
            magic,
            size: unpack_u32(buf, 4)?,
            r#type,
            version,
            num_features: unpack_u32(buf, 16)?,
            num_labels: unpack_u32(buf, 20)?,
            num_attrs: unpack_u32(buf, 24)?,
            off_features: unpack_u32(buf, 28)?,
            off_labels: unpack_u32(buf, 32)?,
            off_attrs: unpack_u32(buf, 36)?,
            off_label_refs: unpack_u32(buf, 40)?,
            off_attr_refs: unpack_u32(buf, 44)?,
        })
    }
}

/// Training provenance stored alongside the weights
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Name of the training algorithm
    pub algorithm: Option<String>,
    /// Parameter names and values used for training
    pub params: Vec<(String, String)>,
}

impl Metadata {
    /// Look up a training parameter value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn parse(buf: &[u8], offset: usize) -> Result<Self> {
        let mut pos = offset + 8;
        let algorithm = read_string(buf, &mut pos)?;
        let count = unpack_u32(buf, pos)? as usize;
        pos += 4;
        let mut params = Vec::new();
        for _ in 0..count {
            let name = read_string(buf, &mut pos)?;
            let value = read_string(buf, &mut pos)?;
            params.push((name, value));
        }
        Ok(Self {
            algorithm: Some(algorithm).filter(|name| !name.is_empty()),
            params,
        })
    }
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = unpack_u32(buf, *pos)? as usize;
    let start = *pos + 4;
    let bytes = buf
        .get(start..start + len)
        .ok_or_else(|| Error::format("truncated metadata string"))?;
    *pos = start + len;
    bytes
        .to_str()
        .map(str::to_string)
        .map_err(|_| Error::format("metadata string is not valid UTF-8"))
}

const CQDB_HEADER_SIZE: usize = 24;
const CQDB_NUM_TABLES: usize = 256;

/// Bounds of a dictionary chunk, checked before `cqdb` reads it
struct DictionaryLayout<'a> {
    chunk: &'a [u8],
    num_entries: u64,
    bwd_size: u32,
    bwd_offset: usize,
}

impl<'a> DictionaryLayout<'a> {
    fn parse(buf: &'a [u8], offset: usize, what: &str) -> Result<Self> {
        let corrupt = |detail: &str| Error::format(format!("corrupt {} dictionary: {}", what, detail));

        unpack_chunk(buf, offset, b"CQDB")?;
        let size = unpack_u32(buf, offset + 4)? as usize;
        let chunk = buf
            .get(offset..offset + size)
            .ok_or_else(|| corrupt("chunk exceeds the model data"))?;
        if size < CQDB_HEADER_SIZE + 8 * CQDB_NUM_TABLES {
            return Err(corrupt("chunk is shorter than its hash tables"));
        }

        let mut num_entries = 0u64;
        for i in 0..CQDB_NUM_TABLES {
            let table_offset = unpack_u32(chunk, CQDB_HEADER_SIZE + 8 * i)? as u64;
            let num = unpack_u32(chunk, CQDB_HEADER_SIZE + 8 * i + 4)? as u64;
            if table_offset == 0 && num > 0 {
                return Err(corrupt("table without offset"));
            }
            if table_offset + 8 * num > size as u64 {
                return Err(corrupt("hash table out of range"));
            }
            num_entries += num / 2;
        }
        if 4 * num_entries > size as u64 {
            return Err(corrupt("too many entries"));
        }

        let bwd_size = unpack_u32(chunk, 16)?;
        let bwd_offset = unpack_u32(chunk, 20)? as usize;
        if bwd_offset > 0 && bwd_offset as u64 + 4 * num_entries > size as u64 {
            return Err(corrupt("backward links out of range"));
        }
        Ok(Self {
            chunk,
            num_entries,
            bwd_size,
            bwd_offset,
        })
    }

    /// Check that entry `id` resolves to a string inside the chunk
    fn check_entry(&self, id: u32) -> bool {
        if self.bwd_offset == 0 || id as u64 >= self.num_entries || id >= self.bwd_size {
            return false;
        }
        let record = match unpack_u32(self.chunk, self.bwd_offset + 4 * id as usize) {
            Ok(record) if record > 0 => record as usize,
            _ => return false,
        };
        match unpack_u32(self.chunk, record + 4) {
            Ok(len) => len > 0 && record + 8 + len as usize <= self.chunk.len(),
            Err(_) => false,
        }
    }
}

fn read_alphabet(buf: &[u8], offset: usize, count: u32, what: &str) -> Result<Alphabet> {
    let layout = DictionaryLayout::parse(buf, offset, what)?;
    let db = CQDB::new(layout.chunk)
        .map_err(|err| Error::format(format!("corrupt {} dictionary: {}", what, err)))?;
    let mut alphabet = Alphabet::new();
    for id in 0..count {
        let name = Some(id)
            .filter(|&id| layout.check_entry(id))
            .and_then(|id| db.to_str(id))
            .and_then(|s| s.to_str().ok())
            .ok_or_else(|| Error::format(format!("{} #{} is missing", what, id)))?;
        if alphabet.get_or_insert(name) != id {
            return Err(Error::format(format!("duplicate {} {:?}", what, name)));
        }
    }
    Ok(alphabet)
}

fn read_refs(buf: &[u8], chunk_offset: usize, count: u32, num_features: usize) -> Result<Vec<FeatureRefs>> {
    let mut refs = Vec::new();
    for id in 0..count as usize {
        let offset = unpack_u32(buf, chunk_offset + CHUNK_SIZE + 4 * id)? as usize;
        let num = unpack_u32(buf, offset)? as usize;
        let mut fids = Vec::new();
        for k in 0..num {
            let fid = unpack_u32(buf, offset + 4 + 4 * k)?;
            if fid as usize >= num_features {
                return Err(Error::format(format!("feature reference {} out of range", fid)));
            }
            fids.push(fid);
        }
        refs.push(FeatureRefs { fids });
    }
    Ok(refs)
}

/// The CRF model
///
/// A model owns its alphabets and weights; it never changes after it is
/// loaded, so a single instance can back any number of [`Tagger`]s across
/// threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    header: Header,
    labels: Alphabet,
    attrs: Alphabet,
    features: Vec<Feature>,
    label_refs: Vec<FeatureRefs>,
    attr_refs: Vec<FeatureRefs>,
    metadata: Metadata,
}

impl Model {
    /// Load a model from a byte buffer
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let header = Header::parse(buf)?;

        let off_features = header.off_features as usize;
        unpack_chunk(buf, off_features, b"FEAT")?;
        let num_features = unpack_u32(buf, off_features + 8)? as usize;
        let num_labels = header.num_labels;
        let num_attrs = header.num_attrs;

        if off_features + CHUNK_SIZE + FEATURE_SIZE * num_features > buf.len() {
            return Err(Error::format("feature chunk exceeds the model data"));
        }
        let mut features = Vec::with_capacity(num_features);
        for fid in 0..num_features {
            let index = off_features + CHUNK_SIZE + FEATURE_SIZE * fid;
            let ftype = unpack_u32(buf, index)?;
            let ftype = FeatureType::from_u32(ftype)
                .ok_or_else(|| Error::format(format!("unknown feature type {}", ftype)))?;
            let src = unpack_u32(buf, index + 4)?;
            let dst = unpack_u32(buf, index + 8)?;
            let weight = unpack_f64(buf, index + 12)?;
            let src_limit = match ftype {
                FeatureType::State => num_attrs,
                FeatureType::Transition => num_labels,
            };
            if src >= src_limit || dst >= num_labels {
                return Err(Error::format(format!(
                    "feature #{} refers to ids outside the alphabets",
                    fid
                )));
            }
            features.push(Feature {
                ftype,
                src,
                dst,
                weight,
            });
        }

        let labels = read_alphabet(buf, header.off_labels as usize, num_labels, "label")?;
        let attrs = read_alphabet(buf, header.off_attrs as usize, num_attrs, "attribute")?;

        let off_label_refs = header.off_label_refs as usize;
        unpack_chunk(buf, off_label_refs, b"LFRF")?;
        let label_refs = read_refs(buf, off_label_refs, num_labels, num_features)?;

        let off_attr_refs = header.off_attr_refs as usize;
        unpack_chunk(buf, off_attr_refs, b"AFRF")?;
        let attr_refs = read_refs(buf, off_attr_refs, num_attrs, num_features)?;

        // The metadata chunk, when present, follows the attribute references.
        let off_metadata = off_attr_refs + unpack_u32(buf, off_attr_refs + 4)? as usize;
        let metadata = match buf.get(off_metadata..off_metadata + 4) {
            Some(tag) if tag == b"META" => Metadata::parse(buf, off_metadata)?,
            _ => Metadata::default(),
        };

        Ok(Self {
            header,
            labels,
            attrs,
            features,
            label_refs,
            attr_refs,
            metadata,
        })
    }

    /// Load a model from a file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let buf = fs::read(path)?;
        Self::from_bytes(&buf)
    }

    /// Serialize the model
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        ModelWriter::to_bytes(&ModelParts {
            features: &self.features,
            labels: &self.labels,
            attrs: &self.attrs,
            label_refs: &self.label_refs,
            attr_refs: &self.attr_refs,
            metadata: &self.metadata,
        })
    }

    /// Write the model to a file, replacing it atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persist_atomic(path.as_ref(), &self.to_bytes()?)
    }

    /// Number of attributes
    pub fn num_attrs(&self) -> usize {
        self.attrs.len()
    }

    /// Number of labels
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Number of features
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Convert a label ID to label string
    pub fn to_label(&self, lid: u32) -> Option<&str> {
        self.labels.to_str(lid)
    }

    /// Convert a label string to label ID
    pub fn to_label_id(&self, value: &str) -> Option<u32> {
        self.labels.to_id(value)
    }

    /// Convert a attribute ID to attribute string
    pub fn to_attr(&self, aid: u32) -> Option<&str> {
        self.attrs.to_str(aid)
    }

    /// Convert a attribute string to attribute ID
    pub fn to_attr_id(&self, value: &str) -> Option<u32> {
        self.attrs.to_id(value)
    }

    /// Label strings in ID order
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.iter().map(|(s, _)| s)
    }

    /// All features with their weights
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Training algorithm and parameters the model was built with
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn label_ref(&self, lid: u32) -> &FeatureRefs {
        &self.label_refs[lid as usize]
    }

    pub(crate) fn attr_ref(&self, aid: u32) -> &FeatureRefs {
        &self.attr_refs[aid as usize]
    }

    pub(crate) fn feature(&self, fid: usize) -> &Feature {
        &self.features[fid]
    }

    /// Total state score of an attribute set for a label
    ///
    /// Returns `None` if the label is unknown. Unknown attributes contribute
    /// nothing.
    pub fn state_score(&self, item: &[Attribute], label: &str) -> Option<f64> {
        let lid = self.to_label_id(label)?;
        let mut score = 0.0;
        for attr in item {
            if let Some(aid) = self.to_attr_id(&attr.name) {
                for fid in self.attr_ref(aid).iter() {
                    let feature = self.feature(fid);
                    if feature.dst == lid {
                        score += feature.weight * attr.value;
                    }
                }
            }
        }
        Some(score)
    }

    /// Weight of the transition `from --> to`
    ///
    /// Returns `None` if either label is unknown; a pruned transition weighs zero.
    pub fn transition_weight(&self, from: &str, to: &str) -> Option<f64> {
        let src = self.to_label_id(from)?;
        let dst = self.to_label_id(to)?;
        let weight = self
            .label_ref(src)
            .iter()
            .map(|fid| self.feature(fid))
            .find(|feature| feature.dst == dst)
            .map_or(0.0, |feature| feature.weight);
        Some(weight)
    }

    /// Get a new tagger
    pub fn tagger(&self) -> Tagger<'_> {
        Tagger::new(self)
    }

    /// Features of one type ordered by descending absolute weight, ties by (source, target).
    fn sorted_features(&self, ftype: FeatureType) -> Vec<&Feature> {
        let mut features: Vec<&Feature> = self
            .features
            .iter()
            .filter(|feature| feature.ftype == ftype)
            .collect();
        features.sort_by(|a, b| {
            b.weight
                .abs()
                .total_cmp(&a.weight.abs())
                .then_with(|| (a.src, a.dst).cmp(&(b.src, b.dst)))
        });
        features
    }

    fn name_of<'a>(alphabet: &'a Alphabet, id: u32) -> &'a str {
        alphabet.to_str(id).unwrap_or("<unknown>")
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        // Dump the file header
        writeln!(w, "FILEHEADER = {{")?;
        let header = &self.header;
        writeln!(w, "  magic: {}", header.magic.as_bstr())?;
        writeln!(w, "  size: {}", header.size)?;
        writeln!(w, "  type: {}", header.r#type.as_bstr())?;
        writeln!(w, "  version: {}", header.version)?;
        writeln!(w, "  num_features: {}", header.num_features)?;
        writeln!(w, "  num_labels: {}", header.num_labels)?;
        writeln!(w, "  num_attrs: {}", header.num_attrs)?;
        writeln!(w, "  off_features: {:#X}", header.off_features)?;
        writeln!(w, "  off_labels: {:#X}", header.off_labels)?;
        writeln!(w, "  off_attrs: {:#X}", header.off_attrs)?;
        writeln!(w, "  off_labelrefs: {:#X}", header.off_label_refs)?;
        writeln!(w, "  off_attrrefs: {:#X}", header.off_attr_refs)?;
        writeln!(w, "}}\n")?;
        // Dump the labels
        writeln!(w, "LABELS = {{")?;
        for (label, id) in self.labels.iter() {
            writeln!(w, "  {:>5}: {}", id, label)?;
        }
        writeln!(w, "}}\n")?;
        // Dump the attributes
        writeln!(w, "ATTRIBUTES = {{")?;
        for (attr, id) in self.attrs.iter() {
            writeln!(w, "  {:>5}: {}", id, attr)?;
        }
        writeln!(w, "}}\n")?;
        // Dump the transition features
        writeln!(w, "TRANSITIONS = {{")?;
        for feature in self.sorted_features(FeatureType::Transition) {
            writeln!(
                w,
                "  ({}) {} --> {}: {:.6}",
                feature.ftype as u32,
                Self::name_of(&self.labels, feature.src),
                Self::name_of(&self.labels, feature.dst),
                feature.weight
            )?;
        }
        writeln!(w, "}}\n")?;
        // Dump the state features
        writeln!(w, "STATE_FEATURES = {{")?;
        for feature in self.sorted_features(FeatureType::State) {
            writeln!(
                w,
                "  ({}) {} --> {}: {:.6}",
                feature.ftype as u32,
                Self::name_of(&self.attrs, feature.src),
                Self::name_of(&self.labels, feature.dst),
                feature.weight
            )?;
        }
        writeln!(w, "}}\n")?;
        // Dump the training metadata
        writeln!(w, "METADATA = {{")?;
        if let Some(algorithm) = &self.metadata.algorithm {
            writeln!(w, "  algorithm: {}", algorithm)?;
        }
        for (name, value) in &self.metadata.params {
            writeln!(w, "  {}: {}", name, value)?;
        }
        writeln!(w, "}}\n")?;
        Ok(())
    }

    /// Dump the model to a text file
    pub fn dump_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.dump(&mut w)?;
        w.flush()?;
        Ok(())
    }
}
