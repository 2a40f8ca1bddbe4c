use crate::classifier::{top_prediction, ClassifierError, ImageClassifier, Prediction};
use crate::config::ModelConfig;
use ndarray::{Array, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Decodes the upload into a `(1, H, W, 3)` batch of raw RGB pixel values.
/// No resizing or rescaling happens here; the exported model consumes the
/// image at whatever size the client sent.
fn image_to_batch(image_data: &[u8]) -> Result<Array<f32, Ix4>, ClassifierError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let img = image_reader
        .decode()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?
        .to_rgb8();

    let (width, height) = img.dimensions();
    let mut input = Array::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = r as f32;
        input[[0, y as usize, x as usize, 1]] = g as f32;
        input[[0, y as usize, x as usize, 2]] = b as f32;
    }

    Ok(input)
}

pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtClassifier {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let output_name = {
            let session = sessions
                .first()
                .ok_or("model config requested zero session instances")?
                .lock()
                .map_err(|e| format!("session mutex poisoned: {}", e))?;
            session
                .outputs
                .first()
                .ok_or("model has no outputs")?
                .name
                .clone()
        };

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
        })
    }

    fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| ClassifierError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

impl ImageClassifier for OrtClassifier {
    fn classify(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError> {
        let input = image_to_batch(image_data)?;
        let outputs = self.run_inference(&input)?;

        if outputs.ndim() < 2 {
            return Err(ClassifierError::Output(format!(
                "expected a batched probability vector, got shape {:?}",
                outputs.shape()
            )));
        }

        let probabilities: Vec<f32> = outputs.index_axis(Axis(0), 0).iter().copied().collect();

        top_prediction(&probabilities)
    }
}
