use serde::Serialize;
use thiserror::Error;

/// Label table in model output-index order.
pub const CLASS_NAMES: [&str; 3] = ["Early Blight", "Late Blight", "Healthy"];

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

pub trait ImageClassifier: Send + Sync + 'static {
    fn classify(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError>;
}

/// Arg-max over the probability vector gives the class, max gives the confidence.
pub fn top_prediction(probabilities: &[f32]) -> Result<Prediction, ClassifierError> {
    let (class_index, confidence) = probabilities
        .iter()
        .enumerate()
        .map(|(index, value)| (index, *value))
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        .ok_or_else(|| ClassifierError::Output("empty probability vector".into()))?;

    let class = CLASS_NAMES
        .get(class_index)
        .ok_or_else(|| {
            ClassifierError::Output(format!(
                "class index {} out of range for {} labels",
                class_index,
                CLASS_NAMES.len()
            ))
        })?
        .to_string();

    Ok(Prediction { class, confidence })
}
