/// Feature type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureType {
    /// State feature: (attribute, label)
    State = 0,
    /// Transition feature: (label, label)
    Transition = 1,
}

impl FeatureType {
    pub(crate) fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::State),
            1 => Some(Self::Transition),
            _ => None,
        }
    }
}

/// A weighted feature.
///
/// For a state feature `src` is an attribute id; for a transition feature
/// it is the label id of the previous position. `dst` is always a label id.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub ftype: FeatureType,
    pub src: u32,
    pub dst: u32,
    pub weight: f64,
}

/// Feature references
///
/// This is a collection of feature ids used for faster accesses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRefs {
    pub fids: Vec<u32>,
}

impl FeatureRefs {
    pub fn len(&self) -> usize {
        self.fids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fids.iter().map(|&fid| fid as usize)
    }
}
