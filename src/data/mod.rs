//! Tabular data handed to and produced by the runner

mod frame;
mod predictions;
mod provider;

pub use frame::{take_targets, Frame};
pub use predictions::PredictionFrame;
pub use provider::{frame_from_dataframe, load_csv, target_from_dataframe, FeatureProvider, FeatureSet};
