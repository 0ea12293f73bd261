use super::feature_gen::FeatureGenerator;
use crate::alphabet::Alphabet;
use crate::feature::{Feature, FeatureRefs, FeatureType};
use crate::model::Metadata;
use crate::model_writer::ModelParts;

/// Trained features with zero-weight features and unused attributes removed
#[derive(Debug)]
pub(crate) struct PrunedModel {
    /// Features with non-zero weights
    features: Vec<Feature>,
    /// Attribute refs with remapped feature IDs
    attr_refs: Vec<FeatureRefs>,
    /// Label refs with remapped feature IDs
    label_refs: Vec<FeatureRefs>,
    /// Attributes with at least one surviving state feature
    attrs: Alphabet,
}

impl PrunedModel {
    /// Prune a weighted feature set
    pub fn from_fgen(fgen: &FeatureGenerator, attrs: &Alphabet) -> Self {
        // Build feature map (old_fid -> new_fid) for non-zero features
        let mut fmap: Vec<Option<u32>> = vec![None; fgen.features.len()];
        let mut features = Vec::new();
        for (old_fid, feature) in fgen.features.iter().enumerate() {
            if feature.weight != 0.0 {
                fmap[old_fid] = Some(features.len() as u32);
                features.push(feature.clone());
            }
        }

        // Build attribute map (old_aid -> new_aid), keeping the original order
        let mut amap: Vec<Option<u32>> = vec![None; fgen.attr_refs.len()];
        let mut pruned_attrs = Alphabet::new();
        for (old_aid, refs) in fgen.attr_refs.iter().enumerate() {
            if !refs.iter().any(|fid| fmap[fid].is_some()) {
                continue;
            }
            if let Some(name) = attrs.to_str(old_aid as u32) {
                amap[old_aid] = Some(pruned_attrs.get_or_insert(name));
            }
        }

        // State features point at attributes; transition sources are labels
        for feature in &mut features {
            if feature.ftype == FeatureType::State {
                if let Some(new_aid) = amap[feature.src as usize] {
                    feature.src = new_aid;
                }
            }
        }

        let remap = |refs: &FeatureRefs| FeatureRefs {
            fids: refs.iter().filter_map(|fid| fmap[fid]).collect(),
        };
        let mut attr_refs = vec![FeatureRefs::default(); pruned_attrs.len()];
        for (old_aid, refs) in fgen.attr_refs.iter().enumerate() {
            if let Some(new_aid) = amap[old_aid] {
                attr_refs[new_aid as usize] = remap(refs);
            }
        }
        let label_refs = fgen.label_refs.iter().map(remap).collect();

        Self {
            features,
            attr_refs,
            label_refs,
            attrs: pruned_attrs,
        }
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_attrs(&self) -> usize {
        self.attrs.len()
    }

    /// Borrow everything the model writer needs
    pub fn parts<'a>(&'a self, labels: &'a Alphabet, metadata: &'a Metadata) -> ModelParts<'a> {
        ModelParts {
            features: &self.features,
            labels,
            attrs: &self.attrs,
            label_refs: &self.label_refs,
            attr_refs: &self.attr_refs,
            metadata,
        }
    }
}
