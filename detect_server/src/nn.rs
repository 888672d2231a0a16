//! COCO-SSD object detection with `tract`.
//!
//! The model is an SSD exported from the TensorFlow object detection zoo to ONNX. It takes a
//! `uint8` image of shape `[1, H, W, 3]` and returns four outputs:
//! - `detection_boxes`: `[1, N, 4]` normalized `[ymin, xmin, ymax, xmax]`
//! - `detection_classes`: `[1, N]` COCO class ids
//! - `detection_scores`: `[1, N]` confidences
//! - `num_detections`: `[1]` number of valid rows
use std::{fmt, path::PathBuf, str::FromStr};

use common::{BBox, Detection};
use image::RgbImage;
use itertools::izip;
use ndarray::s;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

use crate::{
    error::{DetectionError, ModelLoadError},
    labels::coco_label,
    utils::download_file,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Detect objects on a single frame.
pub trait DetectModel: Send + Sync {
    /// Detections in pixel coordinates of `frame`, most confident first.
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

/// Model variant, trading speed for accuracy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ModelVariant {
    /// Smallest and fastest.
    #[default]
    LiteMobilenetV2,
    MobilenetV1,
    /// Largest and most accurate.
    MobilenetV2,
}

impl ModelVariant {
    pub fn filename(&self) -> &'static str {
        match self {
            Self::LiteMobilenetV2 => "ssdlite_mobilenet_v2_coco.onnx",
            Self::MobilenetV1 => "ssd_mobilenet_v1_coco.onnx",
            Self::MobilenetV2 => "ssd_mobilenet_v2_coco.onnx",
        }
    }

    /// Square input size in pixels.
    pub fn input_size(&self) -> u32 {
        300
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LiteMobilenetV2 => "lite_mobilenet_v2",
            Self::MobilenetV1 => "mobilenet_v1",
            Self::MobilenetV2 => "mobilenet_v2",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lite_mobilenet_v2" => Ok(Self::LiteMobilenetV2),
            "mobilenet_v1" => Ok(Self::MobilenetV1),
            "mobilenet_v2" => Ok(Self::MobilenetV2),
            other => Err(format!(
                "unknown model variant {other}, expected lite_mobilenet_v2, mobilenet_v1 or mobilenet_v2"
            )),
        }
    }
}

/// Options for loading and running the model.
#[derive(Clone, Debug)]
pub struct ModelOptions {
    pub variant: ModelVariant,
    /// Directory holding the `.onnx` files.
    pub model_dir: PathBuf,
    /// Files missing from `model_dir` are fetched from `{base_url}/{filename}`.
    pub base_url: Option<String>,
    pub min_score: f32,
    pub max_detections: usize,
    pub max_iou: f32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            variant: ModelVariant::default(),
            model_dir: default_model_dir(),
            base_url: None,
            min_score: 0.5,
            max_detections: 20,
            max_iou: 0.5,
        }
    }
}

impl ModelOptions {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(self.variant.filename())
    }
}

/// `~/.cache/objcam` or `./models` if there is no cache directory.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("objcam"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Indices of the named outputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputLayout {
    pub count: usize,
    pub boxes: usize,
    pub scores: usize,
    pub classes: usize,
}

impl Default for OutputLayout {
    /// Output order of the ONNX model zoo export.
    fn default() -> Self {
        Self {
            count: 0,
            boxes: 1,
            scores: 2,
            classes: 3,
        }
    }
}

impl OutputLayout {
    /// Match output names, falling back to the default order if any output is not recognized.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let find = |needle: &str| {
            names
                .iter()
                .position(|name| name.as_ref().contains(needle))
        };

        match (
            find("num_detections"),
            find("detection_boxes"),
            find("detection_scores"),
            find("detection_classes"),
        ) {
            (Some(count), Some(boxes), Some(scores), Some(classes)) => Self {
                count,
                boxes,
                scores,
                classes,
            },
            _ => Self::default(),
        }
    }
}

/// SSD model trained on COCO.
pub struct CocoSsdModel {
    model: NnModel,
    layout: OutputLayout,
    input_size: u32,
    options: ModelOptions,
}

impl CocoSsdModel {
    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized: RgbImage =
            image::imageops::resize(frame, size, size, image::imageops::FilterType::Triangle);

        tract_ndarray::Array4::from_shape_fn(
            (1, size as usize, size as usize, 3),
            |(_, y, x, c)| resized[(x as _, y as _)][c],
        )
        .into()
    }

    fn postproc(&self, raw_nn_out: NnOut, frame_size: (u32, u32)) -> TractResult<Vec<Detection>> {
        let as_f32 = |idx: usize| -> TractResult<Vec<f32>> {
            let tensor = raw_nn_out
                .get(idx)
                .ok_or_else(|| anyhow::anyhow!("model has no output {}", idx))?;
            Ok(tensor.cast_to::<f32>()?.as_slice::<f32>()?.to_vec())
        };

        let count = as_f32(self.layout.count)?
            .first()
            .map(|count| *count as usize)
            .unwrap_or(0);

        let boxes = raw_nn_out
            .get(self.layout.boxes)
            .ok_or_else(|| anyhow::anyhow!("model has no box output"))?
            .cast_to::<f32>()?;
        let boxes = boxes.to_array_view::<f32>()?;
        let boxes: Vec<[f32; 4]> = boxes
            .slice(s![0, .., ..])
            .outer_iter()
            .filter_map(|row| row.to_vec().try_into().ok())
            .collect();

        let scores = as_f32(self.layout.scores)?;
        let classes = as_f32(self.layout.classes)?;

        Ok(postproc_ssd(
            &boxes,
            &classes,
            &scores,
            count,
            frame_size,
            &self.options,
        ))
    }
}

impl DetectModel for CocoSsdModel {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        let valid_input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self
            .model
            .run(valid_input)
            .map_err(|err| DetectionError::Inference(format!("{err:#}")))?;

        self.postproc(raw_nn_out, frame.dimensions())
            .map_err(|err| DetectionError::Inference(format!("{err:#}")))
    }
}

/// Load the model once, downloading it first if needed.
pub async fn load_model(options: ModelOptions) -> Result<CocoSsdModel, ModelLoadError> {
    let path = options.model_path();

    if !path.exists() {
        match &options.base_url {
            Some(base_url) => {
                let url = format!(
                    "{}/{}",
                    base_url.trim_end_matches('/'),
                    options.variant.filename()
                );
                log::info!("Downloading model {} from {}", options.variant, url);
                download_file(&reqwest::Client::new(), &url, &path).await?;
            }
            None => return Err(ModelLoadError::NotFound(path)),
        }
    }

    log::info!("Loading model {} from {}", options.variant, path.display());

    // Optimizing the graph takes a while, keep it off the async workers
    tokio::task::spawn_blocking(move || {
        let input_size = options.variant.input_size();
        let (model, layout) = get_ssd_model(&path, input_size)
            .map_err(|err| ModelLoadError::Init(format!("{err:#}")))?;
        log::info!("Model loaded with outputs {:?}", layout);

        Ok(CocoSsdModel {
            model,
            layout,
            input_size,
            options,
        })
    })
    .await
    .map_err(|err| ModelLoadError::Init(err.to_string()))?
}

fn get_ssd_model(path: &std::path::Path, input_size: u32) -> TractResult<(NnModel, OutputLayout)> {
    let size = input_size as usize;
    let input_fact = InferenceFact::dt_shape(u8::datum_type(), tvec!(1, size, size, 3));
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?;

    let names: Vec<String> = model
        .output_outlets()?
        .iter()
        .map(|outlet| {
            model
                .outlet_label(*outlet)
                .unwrap_or(&model.node(outlet.node).name)
                .to_owned()
        })
        .collect();
    let layout = OutputLayout::from_names(&names);

    let model = model.into_optimized()?.into_runnable()?;

    Ok((model, layout))
}

/// Turn raw SSD outputs into detections in pixel coordinates of a `frame_size` frame.
///
/// Candidates below `min_score` are dropped, the rest goes through non-maximum suppression and
/// is capped at `max_detections`. Classes without a COCO label are dropped.
pub fn postproc_ssd(
    boxes: &[[f32; 4]],
    classes: &[f32],
    scores: &[f32],
    count: usize,
    frame_size: (u32, u32),
    options: &ModelOptions,
) -> Vec<Detection> {
    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);

    let mut candidates: Vec<Candidate> = izip!(boxes, classes, scores)
        .take(count)
        .filter(|(_, _, score)| **score >= options.min_score)
        .map(|(bbox, class, score)| Candidate {
            confidence: *score,
            class_id: *class as u32,
            // [ymin, xmin, ymax, xmax] -> [x_tl, y_tl, x_br, y_br]
            corners: [bbox[1], bbox[0], bbox[3], bbox[2]],
        })
        .collect();

    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    non_maximum_suppression(candidates, options.max_iou, options.max_detections)
        .into_iter()
        .filter_map(|candidate| {
            let category = coco_label(candidate.class_id)?;
            let [x_tl, y_tl, x_br, y_br] = candidate.corners;
            let bbox = BBox::from_corners(
                x_tl.clamp(0.0, 1.0) * width,
                y_tl.clamp(0.0, 1.0) * height,
                x_br.clamp(0.0, 1.0) * width,
                y_br.clamp(0.0, 1.0) * height,
            );
            Some(Detection::new(category, candidate.confidence, bbox))
        })
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    confidence: f32,
    class_id: u32,
    corners: [f32; 4],
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Start with the most confident bounding box and iterate over all other bounding boxes in the
/// order of sinking confidence. Grow the vector of selected bounding boxes by adding only those
/// candidates which do not have an IoU above `max_iou` with already chosen bounding boxes. Stop
/// once `max_selected` boxes are chosen. Suppression ignores the class, like COCO-SSD does.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<Candidate>,
    max_iou: f32,
    max_selected: usize,
) -> Vec<Candidate> {
    let mut selected: Vec<Candidate> = vec![];
    'candidates: while selected.len() < max_selected {
        // Get next most confident bbox from the back of ascending-sorted vector.
        let candidate = match sorted_candidates.pop() {
            Some(candidate) => candidate,
            None => break 'candidates,
        };

        // Check for overlap with any of the selected bboxes
        for chosen in selected.iter() {
            if iou(&candidate.corners, &chosen.corners) > max_iou {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the corner-points will be ill defined, i.e. the top left
    // corner point will be below and to the right of the bottom right corner point. In this case,
    // the area will be zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = corners_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (corners_area(bbox_a) + corners_area(bbox_b) - overlap_area + EPS)
}

/// Area of `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
fn corners_area(bbox: &[f32; 4]) -> f32 {
    BBox::from_corners(bbox[0], bbox[1], bbox[2], bbox[3]).area()
}
