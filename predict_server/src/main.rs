//! Predict server binary.
//!
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use predict_server::{
    endpoints::router,
    meter::spawn_meter_logger,
    nn::{load_model, YoloParams},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to bind the HTTP server to
    #[clap(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to serve on
    #[clap(long, default_value_t = 5000)]
    port: u16,

    /// Path of the ONNX detection model
    #[clap(long, default_value = "best.onnx")]
    model: PathBuf,

    /// Side length of the square model input
    #[clap(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
    imgsz: u32,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = 0.25)]
    conf: f32,

    /// IoU above which overlapping boxes of one class are merged
    #[clap(long, default_value_t = 0.7)]
    iou: f32,

    /// Maximum number of detections per image
    #[clap(long, default_value_t = 300)]
    max_det: usize,

    /// Maximum size of an uploaded request body in bytes
    #[clap(long, default_value_t = 16 * 1024 * 1024)]
    max_upload_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // A missing or broken model leaves the server running, predictions then fail fast
    let params = YoloParams {
        input_size: args.imgsz,
        min_confidence: args.conf,
        max_iou: args.iou,
        max_detections: args.max_det,
    };
    let model = load_model(&args.model, params);

    spawn_meter_logger(Duration::from_secs(10));

    let app = router(model, args.max_upload_bytes);

    // Serve HTTP server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    log::info!("Serving predictions on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
