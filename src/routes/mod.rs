mod health;
mod home;
mod metrics;
mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(home::home))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/predict", post(predict::predict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierError, ImageClassifier, Prediction};
    use crate::telemetry::Metrics;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct MockClassifier {
        probabilities: Vec<f32>,
    }

    impl ImageClassifier for MockClassifier {
        fn classify(&self, image_data: &[u8]) -> Result<Prediction, ClassifierError> {
            // Decodes like the real classifier so garbage uploads fail the same way.
            image::ImageReader::new(Cursor::new(image_data))
                .with_guessed_format()
                .map_err(|e| ClassifierError::Decode(e.to_string()))?
                .decode()
                .map_err(|e| ClassifierError::Decode(e.to_string()))?;

            crate::classifier::top_prediction(&self.probabilities)
        }
    }

    fn test_router(probabilities: Vec<f32>) -> Router {
        let state = SharedState {
            classifier: Arc::new(MockClassifier { probabilities }),
            metrics: Arc::new(Metrics::new()),
        };

        Router::new().merge(api_routes()).with_state(state)
    }

    fn png_upload(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([0, 128, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    fn multipart_request(field_name: &str, file_bytes: &[u8]) -> Request<Body> {
        let boundary = "test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; \
                 name=\"{field_name}\"; filename=\"leaf.png\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_home_returns_html() {
        let response = test_router(vec![0.1, 0.1, 0.8])
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/html"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Potato Leaf Disease Classifier"));
        assert!(html.contains("/predict"));
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let response = test_router(vec![0.1, 0.1, 0.8])
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_returns_class_and_confidence() {
        let response = test_router(vec![0.05, 0.90, 0.05])
            .oneshot(multipart_request("file", &png_upload(256, 256)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["class"], "Late Blight");
        assert!((json["confidence"].as_f64().unwrap() - 0.90).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_predict_confidence_stays_in_unit_interval() {
        let response = test_router(vec![0.6, 0.3, 0.1])
            .oneshot(multipart_request("file", &png_upload(32, 32)))
            .await
            .unwrap();

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let confidence = json["confidence"].as_f64().unwrap();
        let class = json["class"].as_str().unwrap();

        assert!((0.0..=1.0).contains(&confidence));
        assert!(crate::classifier::CLASS_NAMES.contains(&class));
    }

    #[tokio::test]
    async fn test_predict_rejects_non_image_upload() {
        let response = test_router(vec![0.1, 0.1, 0.8])
            .oneshot(multipart_request("file", b"definitely not an image"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_predict_without_file_field() {
        let response = test_router(vec![0.1, 0.1, 0.8])
            .oneshot(multipart_request("not_file", &png_upload(8, 8)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
