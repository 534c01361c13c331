//! Object detection with a YOLO-style ONNX model.
//!
//! The detector expects a letterboxed `1x3xSxS` input scaled to `[0, 1]` and produces a
//! `1x(4+C)xN` output: `cx, cy, w, h` in input pixels followed by one score per class for
//! each of the `N` candidates.
use std::{collections::BTreeMap, path::Path, sync::Arc};

use anyhow::{anyhow, ensure, Result};
use common::protocol::Detection;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{s, ArrayViewD, Axis, Ix3};
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Gray value of the letterbox border.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Metadata key under which the exporter stores the class-name table.
const NAMES_METADATA_KEY: &str = "names";

pub trait InferModel: Send + Sync {
    fn run(&self, input: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Input size and thresholds of the detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloParams {
    /// Side length of the square model input.
    pub input_size: u32,
    /// Candidates must score strictly above this.
    pub min_confidence: f32,
    /// Same-class boxes overlapping more than this are suppressed.
    pub max_iou: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_confidence: 0.25,
            max_iou: 0.7,
            max_detections: 300,
        }
    }
}

pub struct YoloModel {
    model: NnModel,
    class_names: ClassNames,
    params: YoloParams,
}

/// Class names by class id, as listed in the model metadata.
pub type ClassNames = BTreeMap<usize, String>;

impl YoloModel {
    /// Load and optimize the ONNX model at `path`.
    ///
    /// Class names are taken from the `names` metadata entry of the model file.
    pub fn load(path: impl AsRef<Path>, params: YoloParams) -> Result<Self> {
        ensure!(params.input_size > 0, "model input size must be positive");

        let onnx = tract_onnx::onnx();
        let proto = onnx.proto_model_for_path(path)?;

        let class_names = proto
            .metadata_props
            .iter()
            .find(|prop| prop.key == NAMES_METADATA_KEY)
            .map(|prop| parse_class_names(&prop.value))
            .unwrap_or_default();

        let side = params.input_size as usize;
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side));
        let model = onnx
            .model_for_proto_model(&proto)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            class_names,
            params,
        })
    }

    pub fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn preproc(&self, input: &DynamicImage) -> Result<(Tensor, Letterbox)> {
        let rgb: RgbImage = input.to_rgb8();
        ensure!(rgb.width() > 0 && rgb.height() > 0, "image has no pixels");

        Ok(letterbox_tensor(&rgb, self.params.input_size))
    }
}

impl InferModel for YoloModel {
    fn run(&self, input: &DynamicImage) -> Result<Vec<Detection>> {
        let (tensor, letterbox) = self.preproc(input)?;
        let raw_nn_out = self.model.run(tvec!(tensor.into()))?;
        let output = raw_nn_out
            .first()
            .ok_or_else(|| anyhow!("detector produced no output"))?;

        let candidates =
            decode_candidates(output.to_array_view::<f32>()?, self.params.min_confidence)?;
        let selected = non_maximum_suppression(
            candidates,
            self.params.max_iou,
            self.params.max_detections,
        );

        let detections = selected
            .into_iter()
            .map(|candidate| {
                Detection::new(
                    class_name(&self.class_names, candidate.class_id),
                    candidate.confidence,
                    letterbox.restore(&candidate.bbox),
                )
            })
            .collect();

        Ok(detections)
    }
}

/// Detector shared by all requests. Empty when loading failed at startup.
#[derive(Clone, Default)]
pub struct ModelHandle(Option<Arc<dyn InferModel>>);

impl ModelHandle {
    pub fn new(model: impl InferModel + 'static) -> Self {
        Self(Some(Arc::new(model)))
    }

    pub fn unloaded() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<Arc<dyn InferModel>> {
        self.0.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.0.is_some()
    }
}

/// Load the detector, logging instead of failing so the server can run degraded.
pub fn load_model(path: &Path, params: YoloParams) -> ModelHandle {
    match YoloModel::load(path, params) {
        Ok(model) => {
            log::info!(
                "Model loaded from {} with {} classes",
                path.display(),
                model.class_names().len()
            );
            ModelHandle::new(model)
        }
        Err(err) => {
            log::error!("Error loading model from {}: {err:#}", path.display());
            ModelHandle::unloaded()
        }
    }
}

/// Resize `rgb` into a `1x3xSxS` tensor with `S = side`, padding the border with gray.
///
/// `rgb` must have at least one pixel and `side` must be positive.
fn letterbox_tensor(rgb: &RgbImage, side: u32) -> (Tensor, Letterbox) {
    let letterbox = Letterbox::new(rgb.width(), rgb.height(), side);
    let resized: RgbImage = image::imageops::resize(
        rgb,
        letterbox.inner_width,
        letterbox.inner_height,
        FilterType::Triangle,
    );

    let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
        (1, 3, side as usize, side as usize),
        |(_, c, y, x)| match letterbox.to_inner(x as u32, y as u32) {
            Some((x, y)) => resized[(x, y)][c] as f32 / 255.0,
            None => PAD_VALUE,
        },
    )
    .into();

    (tensor, letterbox)
}

/// Aspect-preserving placement of an image inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f32,
    inner_width: u32,
    inner_height: u32,
    pad_x: u32,
    pad_y: u32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn new(width: u32, height: u32, side: u32) -> Self {
        let scale = f32::min(side as f32 / width as f32, side as f32 / height as f32);
        let inner_width = ((width as f32 * scale).round() as u32).clamp(1, side);
        let inner_height = ((height as f32 * scale).round() as u32).clamp(1, side);

        Self {
            scale,
            inner_width,
            inner_height,
            pad_x: (side - inner_width) / 2,
            pad_y: (side - inner_height) / 2,
            width,
            height,
        }
    }

    /// Map a model input pixel to the resized image, `None` on the border.
    fn to_inner(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        let x = x.checked_sub(self.pad_x).filter(|x| *x < self.inner_width)?;
        let y = y.checked_sub(self.pad_y).filter(|y| *y < self.inner_height)?;
        Some((x, y))
    }

    /// Map a box from model input pixels back to the original image, clipped to its bounds.
    fn restore(&self, bbox: &[f32; 4]) -> [f32; 4] {
        let x = |v: f32| ((v - self.pad_x as f32) / self.scale).clamp(0.0, self.width as f32);
        let y = |v: f32| ((v - self.pad_y as f32) / self.scale).clamp(0.0, self.height as f32);
        [x(bbox[0]), y(bbox[1]), x(bbox[2]), y(bbox[3])]
    }
}

/// Candidate box in model input pixels.
#[derive(Clone, Debug, PartialEq)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    bbox: [f32; 4],
}

/// Pick the best class of every candidate and keep those above `min_confidence`.
fn decode_candidates(output: ArrayViewD<'_, f32>, min_confidence: f32) -> Result<Vec<Candidate>> {
    let shape = output.shape().to_vec();
    let output = output.into_dimensionality::<Ix3>()?;
    ensure!(
        shape[0] == 1 && shape[1] > 4,
        "unexpected detector output shape {shape:?}"
    );

    let candidates = output
        .slice(s![0, .., ..])
        .axis_iter(Axis(1))
        .filter_map(|column: ndarray::ArrayView1<f32>| {
            let (class_id, confidence) = column.slice(s![4..]).iter().copied().enumerate().fold(
                (0, f32::MIN),
                |best, (class_id, score)| match score > best.1 {
                    true => (class_id, score),
                    false => best,
                },
            );
            if confidence <= min_confidence {
                return None;
            }

            let (cx, cy) = (column[0], column[1]);
            let (half_w, half_h) = (column[2].max(0.0) / 2.0, column[3].max(0.0) / 2.0);
            Some(Candidate {
                class_id,
                confidence,
                bbox: [cx - half_w, cy - half_h, cx + half_w, cy + half_h],
            })
        })
        .collect();

    Ok(candidates)
}

/// Run per-class non-maximum-suppression on candidate bounding boxes.
///
/// Iterate over the candidates in the order of sinking confidence. Grow the vector of selected
/// boxes by adding only those candidates which do not overlap an already selected box of the
/// same class by more than `max_iou`. Stop once `max_detections` boxes are selected.
fn non_maximum_suppression(
    mut candidates: Vec<Candidate>,
    max_iou: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Candidate> = vec![];
    'candidates: while let Some(candidate) = candidates.pop() {
        if selected.len() >= max_detections {
            break;
        }

        for kept in selected.iter() {
            if kept.class_id == candidate.class_id && iou(&candidate.bbox, &kept.bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // Without overlap the corner points are ill defined and the area is zero
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a `[x1, y1, x2, y2]` bounding box.
///
/// Boxes with the bottom-right point above or left of the top-left point have zero area.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Name of `class_id`, `class<id>` when the metadata does not list it.
fn class_name(class_names: &ClassNames, class_id: usize) -> String {
    class_names
        .get(&class_id)
        .cloned()
        .unwrap_or_else(|| format!("class{class_id}"))
}

/// Parse the exporter's class table, e.g. `{0: 'pug', 1: "shih tzu's"}`.
///
/// Only listed ids are stored, so sparse or huge ids cost nothing.
fn parse_class_names(raw: &str) -> ClassNames {
    let mut names = BTreeMap::new();
    let mut rest = raw.trim().trim_start_matches('{').trim_end_matches('}');

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        let Some((id, tail)) = rest.split_once(':') else {
            break;
        };
        let Ok(id) = id.trim().parse::<usize>() else {
            break;
        };
        let tail = tail.trim_start();
        let Some(quote) = tail.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            break;
        };
        let Some(end) = tail[1..].find(quote) else {
            break;
        };

        names.insert(id, tail[1..1 + end].to_owned());
        rest = &tail[2 + end..];
    }

    names
}
