//! Model-serving pipeline for the Mien fabric classifier.
//!
//! A request flows through [`Preprocessor`] → [`ModelHandle`] →
//! [`mapping::map`]; [`Classifier`] bundles the three around one shared model.

pub mod catalog;
pub mod config;
pub mod error;
pub mod inference;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod provision;
pub mod tensor;

pub use catalog::{ClassCatalog, ClassEntry, LabelSet, ReferenceTable};
pub use config::ServingConfig;
pub use error::{ErrorKind, ServingError, ServingResult};
pub use mapping::PredictionResult;
pub use model::{ModelFormat, ModelHandle};
pub use pipeline::{Classifier, bootstrap};
pub use preprocess::{InputSpec, Preprocessor, RawInput};
pub use provision::{ArtifactDescriptor, ArtifactProvisioner, RemoteSource};
pub use tensor::{Distribution, InputTensor};
