use std::fmt;

use crate::alphabet::Alphabet;

/// Label-wise performance values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelScore {
    pub label: String,
    /// Number of correct predictions
    pub num_correct: usize,
    /// Number of occurrences of the label in the gold-standard data
    pub num_observation: usize,
    /// Number of predictions
    pub num_prediction: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Holdout performance after one training iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoldoutStats {
    /// Fraction of correctly predicted items
    pub item_accuracy: f64,
    /// Fraction of instances predicted without any error
    pub instance_accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// Scores of the labels observed in the holdout data, in label ID order
    pub labels: Vec<LabelScore>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    correct: usize,
    observation: usize,
    prediction: usize,
}

/// Accumulates predictions against gold labels
#[derive(Debug)]
pub(crate) struct Evaluation {
    tbl: Vec<Counts>,
    item_correct: usize,
    item_total: usize,
    inst_correct: usize,
    inst_total: usize,
}

impl Evaluation {
    pub fn new(num_labels: usize) -> Self {
        Self {
            tbl: vec![Counts::default(); num_labels],
            item_correct: 0,
            item_total: 0,
            inst_correct: 0,
            inst_total: 0,
        }
    }

    pub fn accumulate(&mut self, reference: &[u32], prediction: &[u32]) {
        let mut matched = 0;
        for (&r, &p) in reference.iter().zip(prediction) {
            self.tbl[r as usize].observation += 1;
            self.tbl[p as usize].prediction += 1;
            if r == p {
                self.tbl[r as usize].correct += 1;
                matched += 1;
            }
            self.item_total += 1;
        }
        self.item_correct += matched;
        if matched == reference.len() {
            self.inst_correct += 1;
        }
        self.inst_total += 1;
    }

    /// Compute the scores. Labels never observed in the gold data are
    /// excluded from the macro averages.
    pub fn finish(&self, labels: &Alphabet) -> HoldoutStats {
        let mut stats = HoldoutStats::default();
        for (lid, counts) in self.tbl.iter().enumerate() {
            if counts.observation == 0 {
                continue;
            }
            let precision = if counts.prediction > 0 {
                counts.correct as f64 / counts.prediction as f64
            } else {
                0.0
            };
            let recall = counts.correct as f64 / counts.observation as f64;
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            stats.labels.push(LabelScore {
                label: labels.to_str(lid as u32).unwrap_or_default().to_string(),
                num_correct: counts.correct,
                num_observation: counts.observation,
                num_prediction: counts.prediction,
                precision,
                recall,
                f1,
            });
        }

        let n = stats.labels.len();
        if n > 0 {
            stats.macro_precision = stats.labels.iter().map(|l| l.precision).sum::<f64>() / n as f64;
            stats.macro_recall = stats.labels.iter().map(|l| l.recall).sum::<f64>() / n as f64;
            stats.macro_f1 = stats.labels.iter().map(|l| l.f1).sum::<f64>() / n as f64;
        }
        if self.item_total > 0 {
            stats.item_accuracy = self.item_correct as f64 / self.item_total as f64;
        }
        if self.inst_total > 0 {
            stats.instance_accuracy = self.inst_correct as f64 / self.inst_total as f64;
        }
        stats
    }
}

impl fmt::Display for HoldoutStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance by label (#match, #model, #ref) (precision, recall, F1):")?;
        for l in &self.labels {
            writeln!(
                f,
                "    {}: ({}, {}, {}) ({:.4}, {:.4}, {:.4})",
                l.label, l.num_correct, l.num_prediction, l.num_observation, l.precision, l.recall, l.f1
            )?;
        }
        writeln!(
            f,
            "Macro-average precision, recall, F1: ({:.6}, {:.6}, {:.6})",
            self.macro_precision, self.macro_recall, self.macro_f1
        )?;
        writeln!(f, "Item accuracy: {:.6}", self.item_accuracy)?;
        write!(f, "Instance accuracy: {:.6}", self.instance_accuracy)
    }
}
