use mien_serving::Classifier;
use minijinja::Environment;
use std::sync::Arc;

pub type AppState = Arc<State>;

/// Default cap on request bodies, uploads included
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");
const RESULT_TEMPLATE: &str = include_str!("../templates/result.html");
const ERROR_TEMPLATE: &str = include_str!("../templates/error.html");

pub struct State {
    pub classifier: Classifier,
    pub max_upload_bytes: usize,
    pub templates: Environment<'static>,
}

impl State {
    pub fn new(classifier: Classifier, max_upload_bytes: usize) -> Result<Self, minijinja::Error> {
        let mut templates = Environment::new();
        templates.add_template("index.html", INDEX_TEMPLATE)?;
        templates.add_template("result.html", RESULT_TEMPLATE)?;
        templates.add_template("error.html", ERROR_TEMPLATE)?;

        Ok(Self {
            classifier,
            max_upload_bytes,
            templates,
        })
    }
}
