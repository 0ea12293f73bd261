//! Linear-chain Conditional Random Fields (CRF)
//!
//! This library trains first-order linear-chain CRFs and uses them to label
//! sequences. Models are stored in the CRFsuite file layout.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use chaincrf::train::{Algorithm, Trainer};
//! use chaincrf::Attribute;
//!
//! let mut trainer = Trainer::new(true);
//! trainer.select(Algorithm::Lbfgs)?;
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let yseq = vec!["sunny", "rainy"];
//! trainer.append(&xseq, &yseq, 0)?;
//!
//! trainer.set("c2", "1.0")?;
//! let summary = trainer.train("model.crfsuite", -1)?;
//! println!("final loss: {:?}", summary.final_loss());
//! # Ok::<(), chaincrf::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! use chaincrf::{Attribute, Model};
//!
//! let model = Model::open("model.crfsuite")?;
//! let mut tagger = model.tagger();
//!
//! let xseq = vec![
//!     vec![Attribute::new("walk", 1.0)],
//!     vec![Attribute::new("shop", 1.0)],
//! ];
//! let labels = tagger.tag(&xseq)?;
//! let probability = tagger.probability(&labels)?;
//! # Ok::<(), chaincrf::Error>(())
//! ```

mod alphabet;
mod attribute;
mod context;
mod dataset;
mod error;
mod feature;
mod model;
mod model_writer;
mod tagger;

/// Training module containing all components for training CRF models
pub mod train;

// Re-export main types
pub use self::alphabet::Alphabet;
pub use self::attribute::Attribute;
pub use self::error::{Error, Result};
pub use self::feature::{Feature, FeatureType};
pub use self::model::{Metadata, Model};
pub use self::tagger::Tagger;

// Re-export training types for convenience
pub use self::train::{Algorithm, Trainer};
