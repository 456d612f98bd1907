use bytes::Bytes;
use image::{ImageBuffer, Rgb};
use mien_serving::{
    ClassCatalog, ClassEntry, Classifier, Distribution, ErrorKind, InputSpec, InputTensor,
    ModelFormat, ModelHandle, ServingError, ServingResult,
};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the input features as scores, so tests choose the winning class
struct EchoModel {
    input_shape: Vec<usize>,
    calls: AtomicUsize,
}

impl EchoModel {
    fn features(width: usize) -> Arc<Self> {
        Arc::new(Self {
            input_shape: vec![1, width],
            calls: AtomicUsize::new(0),
        })
    }
}

impl ModelHandle for EchoModel {
    fn format(&self) -> ModelFormat {
        ModelFormat::Full
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_width(&self) -> Option<usize> {
        Some(self.input_shape[1])
    }

    fn infer(&self, tensor: &InputTensor) -> ServingResult<Distribution> {
        tensor.ensure_shape(&self.input_shape)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Distribution::new(tensor.to_vec())
    }
}

/// Image model reporting the mean pixel value of each channel
struct ChannelMeanModel;

impl ModelHandle for ChannelMeanModel {
    fn format(&self) -> ModelFormat {
        ModelFormat::Compiled
    }

    fn input_shape(&self) -> &[usize] {
        &[1, 4, 4, 3]
    }

    fn output_width(&self) -> Option<usize> {
        None
    }

    fn infer(&self, tensor: &InputTensor) -> ServingResult<Distribution> {
        tensor.ensure_shape(self.input_shape())?;
        let values = tensor.to_vec();
        let mut sums = [0.0f32; 3];
        for (i, v) in values.iter().enumerate() {
            sums[i % 3] += v;
        }
        let pixels = (values.len() / 3) as f32;
        Distribution::new(sums.iter().map(|s| s / pixels).collect())
    }
}

fn catalog(names: &[&str]) -> ClassCatalog {
    ClassCatalog::from_entries(
        names
            .iter()
            .map(|n| ClassEntry {
                label: n.to_string(),
                link: format!("https://youtu.be/{n}"),
            })
            .collect(),
    )
    .unwrap()
}

fn png(width: u32, height: u32, pixel: [u8; 3]) -> Bytes {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb(pixel));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    Bytes::from(buf.into_inner())
}

#[test]
fn maps_json_values_to_second_class() {
    let classifier =
        Classifier::new(EchoModel::features(4), catalog(&["P1", "P2", "P3", "P4"])).unwrap();

    let result = classifier
        .predict_values(vec![json!(0.1), json!(0.7), json!(0.05), json!(0.15)])
        .unwrap();

    assert_eq!(result.predicted_index, 2);
    assert_eq!(result.predicted_label, "P2");
    assert_eq!(result.youtube_link, "https://youtu.be/P2");
}

#[test]
fn delimited_string_takes_same_path() {
    let classifier =
        Classifier::new(EchoModel::features(4), catalog(&["P1", "P2", "P3", "P4"])).unwrap();
    let result = classifier.predict_delimited(" 0.1, 0.2 ,0.9,0.3").unwrap();
    assert_eq!(result.predicted_index, 3);
    assert_eq!(result.predicted_label, "P3");
}

#[test]
fn wrong_arity_is_shape_error_before_inference() {
    let model = EchoModel::features(4);
    let classifier = Classifier::new(model.clone(), ClassCatalog::default()).unwrap();

    let err = classifier.predict_delimited("1,2,3").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Shape);
    assert!(!err.is_fatal());
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn malformed_token_is_reported_with_position() {
    let classifier = Classifier::new(EchoModel::features(4), ClassCatalog::default()).unwrap();
    let err = classifier.predict_delimited("1,2,abc,4").unwrap_err();
    assert!(matches!(
        err,
        ServingError::MalformedToken { position: 2, ref token } if token == "abc"
    ));
}

#[test]
fn identical_input_yields_identical_result() {
    let classifier = Classifier::new(EchoModel::features(4), ClassCatalog::default()).unwrap();
    let first = classifier.predict_delimited("0.3,0.1,0.3,0.2").unwrap();
    let second = classifier.predict_delimited("0.3,0.1,0.3,0.2").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.predicted_index, 1);
    assert_eq!(first.predicted_label, "Mien_pattern_01");
}

#[test]
fn output_width_must_match_catalog() {
    let err = Classifier::new(EchoModel::features(5), ClassCatalog::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.is_fatal());
}

#[test]
fn undeclared_output_width_is_checked_per_request() {
    let classifier = Classifier::new(Arc::new(ChannelMeanModel), catalog(&["R", "G"])).unwrap();
    let err = classifier
        .predict_image(png(4, 4, [0, 0, 255]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
}

#[test]
fn wider_output_is_rejected_even_when_argmax_has_a_label() {
    let classifier = Classifier::new(Arc::new(ChannelMeanModel), catalog(&["R", "G"])).unwrap();
    let err = classifier
        .predict_image(png(4, 4, [255, 0, 0]))
        .unwrap_err();
    assert!(matches!(
        err,
        ServingError::WidthMismatch {
            scores: 3,
            labels: 2
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Mapping);
}

#[test]
fn narrower_output_is_rejected() {
    let classifier = Classifier::new(
        Arc::new(ChannelMeanModel),
        catalog(&["R", "G", "B", "W"]),
    )
    .unwrap();
    let err = classifier
        .predict_image(png(4, 4, [0, 255, 0]))
        .unwrap_err();
    assert!(matches!(
        err,
        ServingError::WidthMismatch {
            scores: 3,
            labels: 4
        }
    ));
    assert!(!err.is_fatal());
}

#[test]
fn image_is_resized_and_scaled() {
    let classifier =
        Classifier::new(Arc::new(ChannelMeanModel), catalog(&["R", "G", "B"])).unwrap();
    assert_eq!(
        classifier.input_spec(),
        InputSpec::Image {
            height: 4,
            width: 4,
            channels: 3
        }
    );

    let scores = classifier
        .distribution(mien_serving::RawInput::Image(png(16, 16, [0, 255, 0])))
        .unwrap();
    assert_eq!(scores.scores(), &[0.0, 1.0, 0.0]);

    let result = classifier.predict_image(png(4, 4, [255, 0, 0])).unwrap();
    assert_eq!(result.predicted_label, "R");
}

#[test]
fn features_sent_to_image_model_are_rejected() {
    let classifier =
        Classifier::new(Arc::new(ChannelMeanModel), catalog(&["R", "G", "B"])).unwrap();
    let err = classifier.predict_delimited("1,2,3").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn undecodable_image_is_decode_error() {
    let classifier =
        Classifier::new(Arc::new(ChannelMeanModel), catalog(&["R", "G", "B"])).unwrap();
    let err = classifier
        .predict_image(Bytes::from_static(b"not an image"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}
