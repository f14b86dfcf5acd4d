//! Progressive ensemble K-means.
//!
//! Instead of one final partition, the clustering is exposed step by step: every call to
//! [`ProgressiveEnsemble::step`] advances several independent Lloyd runs by one iteration and
//! returns the currently best partition, so a caller can show results while they improve.
//!
//! ```no_run
//! use progressive_kmeans::{EnsembleConfig, ProgressiveEnsemble, SampleMatrix};
//!
//! # fn main() -> progressive_kmeans::Result<()> {
//! let data = SampleMatrix::from_tsv("cells.tsv")?;
//! let mut ensemble = ProgressiveEnsemble::new(data, EnsembleConfig::new(3).with_seed(42))?;
//! while ensemble.has_next() {
//!     let result = ensemble.step();
//!     println!("iteration {} inertia {}", result.iteration, result.inertia);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`ProgressiveElbow`] repeats the ensemble for a list of cluster counts and estimates the
//! elbow of the inertia curve as results come in.

pub mod config;
pub mod dataset;
pub mod elbow;
pub mod ensemble;
pub mod error;
pub mod init;
pub mod knee;
pub mod metrics;
pub mod result;
pub mod run;
pub mod stabilize;
pub mod termination;

pub use config::{ElbowConfig, EnsembleConfig};
pub use dataset::SampleMatrix;
pub use elbow::ProgressiveElbow;
pub use ensemble::ProgressiveEnsemble;
pub use error::{Error, Result};
pub use init::InitMode;
pub use metrics::{MetricFn, MetricSet};
pub use result::{ElbowPartialResult, EnsemblePartialResult};
pub use run::{ProgressiveKMeansRun, RunPartialResult, RunStatus};
pub use termination::{EarlyTerminationAction, EarlyTerminator, RatioInertiaTerminator};
