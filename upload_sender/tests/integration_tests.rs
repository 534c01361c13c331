use std::{io::Cursor, net::SocketAddr};

use common::protocol::Detection;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use predict_server::{
    endpoints::router,
    nn::{InferModel, ModelHandle},
};
use reqwest::{Client, StatusCode};
use upload_sender::{
    upload::{post_image, post_image_bytes, PredictOutcome},
    Error,
};

struct FixedModel(Vec<Detection>);

impl InferModel for FixedModel {
    fn run(&self, _input: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
        Ok(self.0.clone())
    }
}

/// Serve the predict router on an ephemeral local port.
fn spawn_server(model: ModelHandle) -> Result<SocketAddr, Error> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let server = axum::Server::from_tcp(listener)?
        .serve(router(model, 1024 * 1024).into_make_service());
    tokio::spawn(server);

    Ok(addr)
}

fn jpeg_bytes() -> Vec<u8> {
    let image = RgbImage::from_pixel(20, 10, Rgb([10, 200, 10]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageOutputFormat::Jpeg(90)).unwrap();
    buf.into_inner()
}

#[tokio::test]
async fn test_post_image_bytes_detections() -> Result<(), Error> {
    let detections = vec![Detection::new("shiba inu".into(), 0.75, [1.0, 2.0, 18.0, 9.0])];
    let addr = spawn_server(ModelHandle::new(FixedModel(detections.clone())))?;

    let outcome =
        post_image_bytes(&Client::new(), &addr.to_string(), "dog.jpg".into(), jpeg_bytes())
            .await?;

    assert_eq!(outcome, PredictOutcome::Detections(detections));

    Ok(())
}

#[tokio::test]
async fn test_post_image_bytes_rejected() -> Result<(), Error> {
    let addr = spawn_server(ModelHandle::new(FixedModel(vec![])))?;

    let outcome =
        post_image_bytes(&Client::new(), &addr.to_string(), "".into(), jpeg_bytes()).await?;

    assert_eq!(
        outcome,
        PredictOutcome::Rejected {
            status: StatusCode::BAD_REQUEST,
            error: "No file selected for uploading".into(),
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_post_image_without_model() -> Result<(), Error> {
    let addr = spawn_server(ModelHandle::unloaded())?;
    let path = std::env::temp_dir().join(format!("upload_sender_{}.jpg", std::process::id()));
    std::fs::write(&path, jpeg_bytes())?;

    let outcome = post_image(&Client::new(), &addr.to_string(), &path).await;
    std::fs::remove_file(&path)?;

    assert_eq!(
        outcome?,
        PredictOutcome::Rejected {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "Model could not be loaded".into(),
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_post_missing_file_fails() {
    let result = post_image(&Client::new(), "127.0.0.1:5000", "no/such/image.jpg").await;
    assert!(result.is_err());
}
