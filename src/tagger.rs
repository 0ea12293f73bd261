use crate::attribute::Attribute;
use crate::context::{Context, Flag, Reset};
use crate::dataset::{self, Instance, Item};
use crate::error::{Error, Result};
use crate::model::Model;

/// How far the lattice of the current sequence has been computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    /// State scores are filled in
    Set,
    /// Forward-backward has run and marginals are available
    Marginals,
}

/// The tagger provides the functionality for predicting label sequences for input sequences using a model
///
/// A tagger keeps the lattice of the last sequence passed to [`set`](Self::set)
/// or [`tag`](Self::tag), so [`probability`](Self::probability) and
/// [`marginal`](Self::marginal) can be queried for it afterwards.
#[derive(Debug, Clone)]
pub struct Tagger<'a> {
    /// CRF model
    model: &'a Model,
    /// CRF context
    context: Context,
    /// Number of distinct output labels
    num_labels: usize,
    level: Level,
}

impl<'a> Tagger<'a> {
    pub(crate) fn new(model: &'a Model) -> Self {
        let num_labels = model.num_labels();
        let mut context = Context::new(Flag::VITERBI | Flag::MARGINALS, num_labels, 0);
        context.reset(Reset::TRANS);
        let mut tagger = Self {
            model,
            context,
            num_labels,
            level: Level::Set,
        };
        tagger.transition_score();
        tagger.context.exp_transition();
        tagger
    }

    /// Labels of the model in ID order
    pub fn labels(&self) -> Vec<&'a str> {
        self.model.labels().collect()
    }

    /// Length of the current sequence
    pub fn len(&self) -> usize {
        self.context.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.context.num_items == 0
    }

    /// Set an item sequence and compute its state scores.
    ///
    /// Attributes unknown to the model are ignored.
    pub fn set<T: AsRef<[Attribute]>>(&mut self, xseq: &[T]) {
        let mut instance = Instance::with_capacity(xseq.len());
        for item in xseq {
            let mut attrs = Item::new();
            for attr in item.as_ref() {
                if let Some(id) = self.model.to_attr_id(&attr.name) {
                    dataset::accumulate(&mut attrs, id, attr.value);
                }
            }
            instance.push(attrs, 0);
        }

        self.context.set_num_items(instance.len());
        self.context.reset(Reset::STATE);
        self.state_score(&instance);
        self.level = Level::Set;
    }

    /// Predict the label sequence for the item sequence.
    pub fn tag<T: AsRef<[Attribute]>>(&mut self, xseq: &[T]) -> Result<Vec<&'a str>> {
        self.set(xseq);
        self.viterbi()
    }

    /// Find the most probable label sequence for the current sequence.
    pub fn viterbi(&mut self) -> Result<Vec<&'a str>> {
        if self.context.num_items == 0 {
            return Ok(Vec::new());
        }
        if self.num_labels == 0 {
            return Err(Error::invalid_input("the model has no labels"));
        }
        let (label_ids, _score) = self.context.viterbi();
        label_ids.into_iter().map(|id| self.label_name(id)).collect()
    }

    /// Probability of a label sequence for the current sequence.
    pub fn probability<L: AsRef<str>>(&mut self, yseq: &[L]) -> Result<f64> {
        if yseq.len() != self.context.num_items {
            return Err(Error::invalid_input(format!(
                "the number of labels ({}) does not match the sequence length ({})",
                yseq.len(),
                self.context.num_items
            )));
        }
        let path = yseq
            .iter()
            .map(|label| self.label_id(label.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.compute_marginals();
        Ok((self.context.score(&path) - self.context.lognorm()).exp())
    }

    /// Marginal probability of `label` at `position` of the current sequence.
    pub fn marginal(&mut self, label: &str, position: usize) -> Result<f64> {
        let lid = self.label_id(label)?;
        if position >= self.context.num_items {
            return Err(Error::invalid_input(format!(
                "position {} is out of range for a sequence of length {}",
                position, self.context.num_items
            )));
        }
        self.compute_marginals();
        Ok(self.context.marginal_point(lid as usize, position))
    }

    /// Marginal probabilities of every label at every position, `[t][label id]`.
    pub fn marginals(&mut self) -> Vec<Vec<f64>> {
        self.compute_marginals();
        (0..self.context.num_items)
            .map(|t| {
                (0..self.num_labels)
                    .map(|l| self.context.marginal_point(l, t))
                    .collect()
            })
            .collect()
    }

    fn compute_marginals(&mut self) {
        if self.level < Level::Marginals {
            self.context.forward_backward();
            self.level = Level::Marginals;
        }
    }

    fn label_id(&self, label: &str) -> Result<u32> {
        self.model
            .to_label_id(label)
            .ok_or_else(|| Error::invalid_input(format!("unknown label {:?}", label)))
    }

    fn label_name(&self, id: u32) -> Result<&'a str> {
        let model: &'a Model = self.model;
        model
            .to_label(id)
            .ok_or_else(|| Error::format(format!("label #{} is missing from the model", id)))
    }

    fn transition_score(&mut self) {
        // Compute transition scores between two labels
        for i in 0..self.num_labels {
            for fid in self.model.label_ref(i as u32).iter() {
                // Transition feature from #i to #(feature.dst)
                let feature = self.model.feature(fid);
                self.context.trans[[i, feature.dst as usize]] = feature.weight;
            }
        }
    }

    fn state_score(&mut self, instance: &Instance) {
        // Loop over the items in the sequence
        for (t, item) in instance.items.iter().enumerate() {
            // Loop over the attributes attached to the item
            for attr in item {
                // A scale usually represents the attribute frequency in the item
                let value = attr.value;
                // Loop over the state features associated with the attribute
                for fid in self.model.attr_ref(attr.id).iter() {
                    let feature = self.model.feature(fid);
                    self.context.state[[t, feature.dst as usize]] += feature.weight * value;
                }
            }
        }
    }
}
