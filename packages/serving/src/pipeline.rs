use crate::catalog::ClassCatalog;
use crate::config::ServingConfig;
use crate::error::{ServingError, ServingResult};
use crate::inference;
use crate::mapping::{self, PredictionResult};
use crate::model::{self, ModelHandle};
use crate::preprocess::{InputSpec, Preprocessor, RawInput};
use crate::provision::ArtifactProvisioner;
use crate::tensor::Distribution;
use bytes::Bytes;
use std::sync::Arc;

/// The loaded model together with everything needed to answer a request.
///
/// Built once at startup and shared by all request tasks.
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ModelHandle>,
    catalog: Arc<ClassCatalog>,
    preprocessor: Preprocessor,
}

impl Classifier {
    /// Binds a model to a catalog, checking they agree on the class count
    pub fn new(model: Arc<dyn ModelHandle>, catalog: ClassCatalog) -> ServingResult<Self> {
        let spec = InputSpec::from_tensor_shape(model.input_shape())?;

        match model.output_width() {
            Some(width) => catalog.ensure_output_width(width)?,
            None => tracing::warn!(
                labels = catalog.len(),
                "model does not declare its output width, checking per request"
            ),
        }

        Ok(Self {
            model,
            catalog: Arc::new(catalog),
            preprocessor: Preprocessor::new(spec),
        })
    }

    pub fn model(&self) -> &dyn ModelHandle {
        self.model.as_ref()
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn input_spec(&self) -> InputSpec {
        *self.preprocessor.spec()
    }

    /// Preprocess, infer and map one input. Blocks for the forward pass.
    pub fn predict(&self, input: RawInput) -> ServingResult<PredictionResult> {
        let distribution = self.distribution(input)?;
        if distribution.len() != self.catalog.len() {
            return Err(ServingError::WidthMismatch {
                scores: distribution.len(),
                labels: self.catalog.len(),
            });
        }
        mapping::map(
            &distribution,
            self.catalog.labels(),
            self.catalog.references(),
        )
    }

    /// Raw scores for one input, before mapping
    pub fn distribution(&self, input: RawInput) -> ServingResult<Distribution> {
        let tensor = self.preprocessor.prepare(input)?;
        inference::run(self.model.as_ref(), &tensor)
    }

    pub fn predict_values(&self, values: Vec<serde_json::Value>) -> ServingResult<PredictionResult> {
        self.predict(RawInput::Values(values))
    }

    pub fn predict_delimited(&self, text: &str) -> ServingResult<PredictionResult> {
        self.predict(RawInput::Delimited(text.to_string()))
    }

    pub fn predict_image(&self, bytes: Bytes) -> ServingResult<PredictionResult> {
        self.predict(RawInput::Image(bytes))
    }
}

/// Startup phase: provision the artifact, load it and bind the catalog.
///
/// Every error returned here is fatal.
pub async fn bootstrap(config: &ServingConfig) -> ServingResult<Classifier> {
    let catalog = config.catalog()?;
    let descriptor = config.descriptor();

    let provisioner = ArtifactProvisioner::new(config.download_timeout())?;
    let path = provisioner.ensure_local(&descriptor).await?;

    let format = descriptor.format;
    let spec = config.model_input;
    let handle = tokio::task::spawn_blocking(move || model::load(&path, format, spec))
        .await
        .map_err(|e| ServingError::load(format!("model loading task failed: {e}")))??;

    let classifier = Classifier::new(handle, catalog)?;
    tracing::info!(
        format = %classifier.model().format(),
        input = %classifier.input_spec(),
        labels = classifier.catalog().len(),
        "classifier ready"
    );
    Ok(classifier)
}
