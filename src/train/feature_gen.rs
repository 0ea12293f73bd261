use std::collections::{BTreeMap, BTreeSet};

use super::params::{ParamSet, ParamValue};
use crate::dataset::Instance;
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureRefs, FeatureType};

/// Feature generation parameters, shared by every algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureParams {
    minfreq: f64,
    possible_states: bool,
    possible_transitions: bool,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            minfreq: 0.0,
            possible_states: false,
            possible_transitions: false,
        }
    }
}

impl FeatureParams {
    pub fn minfreq(&self) -> f64 {
        self.minfreq
    }

    /// Set the minimum frequency a feature needs to be kept
    pub fn set_minfreq(&mut self, minfreq: f64) -> Result<()> {
        if !(minfreq >= 0.0) {
            return Err(Error::invalid_input("feature.minfreq must be non-negative"));
        }
        self.minfreq = minfreq;
        Ok(())
    }

    pub fn possible_states(&self) -> bool {
        self.possible_states
    }

    /// Generate state features for every (attribute, label) pair
    pub fn set_possible_states(&mut self, enabled: bool) {
        self.possible_states = enabled;
    }

    pub fn possible_transitions(&self) -> bool {
        self.possible_transitions
    }

    /// Generate transition features for every label pair
    pub fn set_possible_transitions(&mut self, enabled: bool) {
        self.possible_transitions = enabled;
    }
}

impl ParamSet for FeatureParams {
    fn names(&self) -> &'static [&'static str] {
        &[
            "feature.minfreq",
            "feature.possible_states",
            "feature.possible_transitions",
        ]
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        match name {
            "feature.minfreq" => Some(ParamValue::Float(self.minfreq)),
            "feature.possible_states" => Some(ParamValue::Bool(self.possible_states)),
            "feature.possible_transitions" => Some(ParamValue::Bool(self.possible_transitions)),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        match name {
            "feature.minfreq" => self.set_minfreq(value.into_f64(name)?),
            "feature.possible_states" => {
                self.set_possible_states(value.into_bool(name)?);
                Ok(())
            }
            "feature.possible_transitions" => {
                self.set_possible_transitions(value.into_bool(name)?);
                Ok(())
            }
            _ => Err(Error::NotFound(name.to_string())),
        }
    }
}

/// Candidate feature with its observed frequency
#[derive(Debug, Clone, Copy)]
struct Candidate {
    freq: f64,
    keep: bool,
}

/// Feature generator for CRF training
#[derive(Debug)]
pub struct FeatureGenerator {
    /// All features
    pub features: Vec<Feature>,
    /// Feature references by attribute ID (state features)
    pub attr_refs: Vec<FeatureRefs>,
    /// Feature references by label ID (transition features)
    pub label_refs: Vec<FeatureRefs>,
}

impl FeatureGenerator {
    /// Generate features from training instances.
    ///
    /// Features with frequency >= `minfreq` are included. A training position
    /// whose gold label would otherwise have no state feature keeps all of
    /// its (attribute, gold label) features regardless of frequency.
    pub fn generate(
        instances: &[&Instance],
        num_attrs: usize,
        num_labels: usize,
        params: &FeatureParams,
    ) -> Result<Self> {
        // Count feature occurrences
        let mut state_counts: BTreeMap<(u32, u32), Candidate> = BTreeMap::new();
        let mut trans_counts: BTreeMap<(u32, u32), Candidate> = BTreeMap::new();
        let unseen = Candidate {
            freq: 0.0,
            keep: false,
        };

        for inst in instances {
            let weight = inst.weight;
            // State feature frequencies are weighted by attribute values
            for (item, &label) in inst.items.iter().zip(&inst.labels) {
                for attr in item {
                    state_counts.entry((attr.id, label)).or_insert(unseen).freq += attr.value * weight;
                }
            }
            for pair in inst.labels.windows(2) {
                trans_counts.entry((pair[0], pair[1])).or_insert(unseen).freq += weight;
            }
        }

        if params.possible_states {
            let observed: BTreeSet<u32> = state_counts.keys().map(|&(aid, _)| aid).collect();
            for aid in observed {
                for lid in 0..num_labels as u32 {
                    state_counts.entry((aid, lid)).or_insert(unseen);
                }
            }
        }
        if params.possible_transitions {
            for prev in 0..num_labels as u32 {
                for lid in 0..num_labels as u32 {
                    trans_counts.entry((prev, lid)).or_insert(unseen);
                }
            }
        }

        for candidate in state_counts.values_mut().chain(trans_counts.values_mut()) {
            candidate.keep = candidate.freq >= params.minfreq;
        }

        // Keep the gold label expressible at every position
        for inst in instances {
            for (item, &label) in inst.items.iter().zip(&inst.labels) {
                let supported = item
                    .iter()
                    .any(|attr| state_counts.get(&(attr.id, label)).map_or(false, |c| c.keep));
                if supported {
                    continue;
                }
                for attr in item {
                    if let Some(candidate) = state_counts.get_mut(&(attr.id, label)) {
                        candidate.keep = true;
                    }
                }
            }
        }

        // Build feature list
        let mut features = Vec::new();
        let mut attr_refs = vec![FeatureRefs::default(); num_attrs];
        let mut label_refs = vec![FeatureRefs::default(); num_labels];

        let state = state_counts
            .into_iter()
            .map(|(key, c)| (FeatureType::State, key, c));
        let trans = trans_counts
            .into_iter()
            .map(|(key, c)| (FeatureType::Transition, key, c));
        for (ftype, (src, dst), candidate) in state.chain(trans) {
            if !candidate.keep {
                continue;
            }
            let fid = u32::try_from(features.len())
                .map_err(|_| Error::invalid_input("too many features"))?;
            features.push(Feature {
                ftype,
                src,
                dst,
                weight: 0.0,
            });
            let refs = match ftype {
                FeatureType::State => &mut attr_refs[src as usize],
                FeatureType::Transition => &mut label_refs[src as usize],
            };
            refs.fids.push(fid);
        }

        Ok(Self {
            features,
            attr_refs,
            label_refs,
        })
    }

    /// Get the number of features
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Copy a weight vector into the features
    pub fn set_weights(&mut self, weights: &[f64]) {
        debug_assert_eq!(weights.len(), self.features.len());
        for (feature, &weight) in self.features.iter_mut().zip(weights) {
            feature.weight = weight;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use crate::dataset::Attribute;

    fn has_state(fgen: &FeatureGenerator, aid: u32, lid: u32) -> bool {
        fgen.features
            .iter()
            .any(|f| f.ftype == FeatureType::State && f.src == aid && f.dst == lid)
    }

    #[test]
    fn test_feature_generation() {
        let mut attrs = Alphabet::new();
        let mut labels = Alphabet::new();

        let walk_id = attrs.get_or_insert("walk");
        let shop_id = attrs.get_or_insert("shop");
        let sunny_id = labels.get_or_insert("sunny");
        let rainy_id = labels.get_or_insert("rainy");

        let mut inst = Instance::with_capacity(3);
        inst.push(vec![Attribute::new(walk_id, 1.0)], sunny_id);
        inst.push(vec![Attribute::new(shop_id, 1.0)], sunny_id);
        inst.push(vec![Attribute::new(walk_id, 1.0)], rainy_id);

        let fgen =
            FeatureGenerator::generate(&[&inst], attrs.len(), labels.len(), &FeatureParams::default())
                .unwrap();

        // walk/sunny, walk/rainy, shop/sunny, sunny->sunny, sunny->rainy
        assert_eq!(fgen.num_features(), 5);
        assert_eq!(fgen.attr_refs[walk_id as usize].len(), 2);
        assert_eq!(fgen.label_refs[sunny_id as usize].len(), 2);
        assert_eq!(fgen.label_refs[rainy_id as usize].len(), 0);
        assert!(has_state(&fgen, shop_id, sunny_id));
        assert!(!has_state(&fgen, shop_id, rainy_id));
    }

    #[test]
    fn test_possible_states_and_transitions() {
        let mut inst = Instance::with_capacity(2);
        inst.push(vec![Attribute::new(0, 1.0)], 0);
        inst.push(vec![Attribute::new(1, 1.0)], 1);

        let mut params = FeatureParams::default();
        params.set_possible_states(true);
        params.set_possible_transitions(true);
        let fgen = FeatureGenerator::generate(&[&inst], 2, 3, &params).unwrap();

        // 2 attributes x 3 labels + 3 x 3 label pairs
        assert_eq!(fgen.num_features(), 6 + 9);
    }

    #[test]
    fn test_minfreq_keeps_gold_support() {
        let mut attrs = Alphabet::new();
        let common = attrs.get_or_insert("common");
        let rare = attrs.get_or_insert("rare");
        let rare2 = attrs.get_or_insert("rare2");

        let mut first = Instance::with_capacity(3);
        first.push(vec![Attribute::new(common, 1.0)], 0);
        first.push(vec![Attribute::new(common, 1.0), Attribute::new(rare2, 1.0)], 0);
        first.push(vec![Attribute::new(rare, 1.0)], 1);
        let mut second = Instance::with_capacity(1);
        second.push(vec![Attribute::new(common, 1.0)], 0);

        let mut params = FeatureParams::default();
        params.set_minfreq(2.0).unwrap();
        let fgen =
            FeatureGenerator::generate(&[&first, &second], attrs.len(), 2, &params).unwrap();

        assert!(has_state(&fgen, common, 0));
        // The only evidence for label 1 survives.
        assert!(has_state(&fgen, rare, 1));
        // Redundant with `common`, so it is pruned.
        assert!(!has_state(&fgen, rare2, 0));
        // Transitions observed once are pruned.
        assert!(fgen
            .features
            .iter()
            .all(|f| f.ftype == FeatureType::State));
    }

    #[test]
    fn test_insertion_order_independent() {
        let mut a = Instance::with_capacity(2);
        a.push(vec![Attribute::new(0, 1.0)], 0);
        a.push(vec![Attribute::new(1, 1.0)], 1);
        let mut b = Instance::with_capacity(1);
        b.push(vec![Attribute::new(1, 1.0)], 0);

        let params = FeatureParams::default();
        let forward = FeatureGenerator::generate(&[&a, &b], 2, 2, &params).unwrap();
        let backward = FeatureGenerator::generate(&[&b, &a], 2, 2, &params).unwrap();
        assert_eq!(forward.features, backward.features);
    }

    #[test]
    fn test_params() {
        let mut params = FeatureParams::default();
        assert!(params.set_minfreq(-1.0).is_err());
        params.set("feature.minfreq", ParamValue::Float(3.0)).unwrap();
        assert_eq!(params.get("feature.minfreq"), Some(ParamValue::Float(3.0)));
        assert!(matches!(
            params.set("c2", ParamValue::Float(1.0)),
            Err(Error::NotFound(_))
        ));
    }
}
