use std::path::PathBuf;

use clap::Parser;
use env_logger::TimestampPrecision;
use reqwest::Client;
use upload_sender::{
    upload::{post_image, PredictOutcome},
    Error,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the predict server to connect to
    #[clap(long, default_value = "127.0.0.1:5000")]
    address: String,

    /// Image file to run detection on
    image: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Uploading {} to {}", args.image.display(), &args.address);

    match post_image(&Client::new(), &args.address, &args.image).await? {
        PredictOutcome::Detections(detections) => {
            log::info!("Server found {} detections", detections.len());
            for detection in detections {
                let [x1, y1, x2, y2] = detection.bounding_box;
                println!(
                    "{}: {:.2}% at ({x1:.1}, {y1:.1}) - ({x2:.1}, {y2:.1})",
                    detection.breed,
                    detection.confidence * 100.0,
                );
            }
        }
        PredictOutcome::Rejected { status, error } => {
            return Err(format!("server answered {status}: {error}").into());
        }
    }

    Ok(())
}
