//! # mutau
//!
//! An event-processing pipeline for μτ final states: a staged selection
//! cascade with cutflow bookkeeping, a multiplicative correction-weight
//! chain, selection-region and analysis-category classification, and
//! weighted histogram accumulation over Parquet event records.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Methods for loading and manipulating [`EventRecord`]-based data.
pub mod data;
/// Weighted histogram accumulators and the analysis booking schema.
pub mod histograms;
/// The per-event processing loop and the artifact it produces.
pub mod pipeline;
/// Selection-region flags and analysis-category classification.
pub mod regions;
/// The event selection cascade and its cutflow bookkeeping.
pub mod selection;
/// Utility functions, enums, and vector types.
pub mod utils;
/// The multiplicative event-weight chain and its correction sources.
pub mod weights;

pub use crate::data::io::{read_parquet, write_parquet};
pub use crate::data::{Dataset, EventRecord, JetCollection, MissingEnergy, Muon, TauCandidate};
pub use crate::histograms::{Hist1D, Hist2D, HistogramStore};
pub use crate::pipeline::{Pipeline, RunArtifact};
pub use crate::regions::{categorize, region_flags};
pub use crate::selection::{Cutflow, SelectionCascade, Stage};
pub use crate::utils::enums::{Category, Process, Region};
pub use crate::utils::vectors::Vec4;
pub use crate::weights::{EventWeight, WeightCalculator};

pub type Result<T> = std::result::Result<T, Error>;

/// The error type used by all `mutau` internal methods
#[derive(Error, Debug)]
pub enum Error {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error returned by the JSON (de)serializer.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An error returned by the Python pickle (de)serializer.
    #[error("Pickle conversion error: {0}")]
    PickleError(#[from] serde_pickle::Error),
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error which occurs when a required column is absent from an input file.
    #[error("Missing required column \"{name}\"!")]
    MissingColumn {
        /// Name of the column which failed lookup
        name: String,
    },
    /// An error which occurs when a column holds a datatype the reader does not support.
    #[error("Column \"{name}\" has invalid datatype \"{datatype}\" (expected Float32 or Float64)!")]
    InvalidColumnType {
        /// Name of the offending column
        name: String,
        /// The datatype it was found to hold
        datatype: String,
    },
    /// An error which occurs when a simulated sample carries no generated-event count.
    #[error("Dataset carries no generated-event count, which is required to normalize simulation!")]
    MissingGenCount,
    /// An error which occurs when a simulated sample has no registered cross section.
    #[error("No cross section registered for sample \"{sample}\"!")]
    MissingCrossSection {
        /// Name of the sample which failed lookup
        sample: String,
    },
    /// An error which occurs when filling a histogram that was never booked.
    #[error("No histogram booked under the name \"{name}\"!")]
    UnknownHistogram {
        /// Name of the histogram which failed lookup
        name: String,
    },
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
