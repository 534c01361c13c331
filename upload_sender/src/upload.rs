//! Upload of images to the prediction endpoint.
//!
use std::path::Path;

use common::protocol::{Detection, ErrorBody, FILE_FIELD, PREDICT_ROUTE};
use reqwest::{multipart, Client, StatusCode};

use crate::Error;

/// Answer of the prediction endpoint.
#[derive(Debug, PartialEq)]
pub enum PredictOutcome {
    Detections(Vec<Detection>),
    Rejected { status: StatusCode, error: String },
}

/// Post the image file at `path` to the server at `address`.
///
/// The file is sent under its own name, like a browser form upload would.
pub async fn post_image(
    client: &Client,
    address: &str,
    path: impl AsRef<Path>,
) -> Result<PredictOutcome, Error> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    post_image_bytes(client, address, file_name, data).await
}

/// Post raw image bytes as multipart field `file` named `file_name`.
pub async fn post_image_bytes(
    client: &Client,
    address: &str,
    file_name: String,
    data: Vec<u8>,
) -> Result<PredictOutcome, Error> {
    log::debug!("Posting {} ({} bytes) to {}", &file_name, data.len(), address);

    let part = multipart::Part::bytes(data).file_name(file_name);
    let form = multipart::Form::new().part(FILE_FIELD, part);

    let resp = client
        .post(format!("http://{address}{PREDICT_ROUTE}"))
        .multipart(form)
        .send()
        .await?;

    let status = resp.status();
    match status.is_success() {
        true => Ok(PredictOutcome::Detections(resp.json().await?)),
        false => {
            let body: ErrorBody = resp.json().await?;
            Ok(PredictOutcome::Rejected {
                status,
                error: body.error,
            })
        }
    }
}
