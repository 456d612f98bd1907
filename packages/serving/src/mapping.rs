use crate::catalog::{LabelSet, ReferenceTable};
use crate::error::{ServingError, ServingResult};
use crate::tensor::Distribution;
use serde::{Deserialize, Serialize};

/// Human-facing outcome of one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// 1-based class number
    pub predicted_index: usize,
    pub predicted_label: String,
    pub youtube_link: String,
}

/// Maps a distribution to its top class.
///
/// Ties resolve to the lowest index.
pub fn map(
    distribution: &Distribution,
    labels: &LabelSet,
    references: &ReferenceTable,
) -> ServingResult<PredictionResult> {
    let (index, score) = distribution.argmax();

    let label = labels.get(index).ok_or(ServingError::IndexOutOfRange {
        index,
        labels: labels.len(),
    })?;
    let link = references
        .get(label)
        .ok_or_else(|| ServingError::MissingReference(label.to_string()))?;

    tracing::debug!(index, score, label, "mapped prediction");

    Ok(PredictionResult {
        predicted_index: index + 1,
        predicted_label: label.to_string(),
        youtube_link: link.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tables() -> (LabelSet, ReferenceTable) {
        let names = ["P1", "P2", "P3", "P4"];
        let labels = LabelSet::new(names.iter().map(|n| n.to_string()).collect());
        let references = ReferenceTable::new(
            names
                .iter()
                .map(|n| (n.to_string(), format!("https://youtu.be/{n}")))
                .collect::<HashMap<_, _>>(),
        );
        (labels, references)
    }

    #[test]
    fn picks_the_highest_score() {
        let (labels, references) = tables();
        let dist = Distribution::new(vec![0.1, 0.7, 0.05, 0.15]).unwrap();
        let result = map(&dist, &labels, &references).unwrap();
        assert_eq!(
            result,
            PredictionResult {
                predicted_index: 2,
                predicted_label: "P2".into(),
                youtube_link: "https://youtu.be/P2".into(),
            }
        );
    }

    #[test]
    fn ties_resolve_to_first_label() {
        let (labels, references) = tables();
        let dist = Distribution::new(vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let result = map(&dist, &labels, &references).unwrap();
        assert_eq!(result.predicted_index, 1);
        assert_eq!(result.predicted_label, "P1");
    }

    #[test]
    fn last_class_is_reported_as_n() {
        let (labels, references) = tables();
        let dist = Distribution::new(vec![0.0, 0.0, 0.1, 0.9]).unwrap();
        let result = map(&dist, &labels, &references).unwrap();
        assert_eq!(result.predicted_index, labels.len());
    }

    #[test]
    fn wider_distribution_than_labels_is_mapping_error() {
        let (labels, references) = tables();
        let dist = Distribution::new(vec![0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let err = map(&dist, &labels, &references).unwrap_err();
        assert!(matches!(
            err,
            ServingError::IndexOutOfRange {
                index: 4,
                labels: 4
            }
        ));
        assert_eq!(err.kind(), crate::ErrorKind::Mapping);
    }

    #[test]
    fn missing_reference_is_mapping_error() {
        let (labels, _) = tables();
        let dist = Distribution::new(vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let err = map(&dist, &labels, &ReferenceTable::default()).unwrap_err();
        assert!(matches!(err, ServingError::MissingReference(ref l) if l == "P1"));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let result = PredictionResult {
            predicted_index: 3,
            predicted_label: "P3".into(),
            youtube_link: "https://youtu.be/P3".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["predicted_index"], 3);
        assert_eq!(json["predicted_label"], "P3");
        assert_eq!(json["youtube_link"], "https://youtu.be/P3");
    }
}
