pub mod model;
pub mod aggregator;

pub use model::{Ensemble, EvalError, LoadOptions, LoadedEnsemble, ModelError, Transform, UnsupportedTransform};
pub use aggregator::{Prediction, SignalPredictor};
