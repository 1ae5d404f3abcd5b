// -- submodules
mod detections;

pub use detections::{Detection, Detections};

// -- external imports
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;
use ultralytics_inference as ul;

use crate::error::{AppError, Result};
use crate::frame::Frame;

/// Anything that turns a frame into detections.
///
/// The confidence threshold is supplied on every call and never stored.
pub trait Detector: Send + Sync {
    fn predict(&self, frame: &Frame, conf: f32) -> Result<Detections>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelArgs {
    /// Path to ONNX model file
    pub model: PathBuf,

    /// Default confidence threshold for detection calls
    pub conf: f32,

    /// Confidence the engine itself filters at; per-call thresholds below it have no effect
    pub floor_conf: f32,

    /// IoU threshold for NMS
    pub iou: f32,

    /// Maximum number of detections
    pub max_det: usize,

    /// Inference image size
    pub imgsz: Option<usize>,

    /// Use FP16 half-precision inference
    pub half: bool,

    /// Device to use (cpu, cuda:0, mps, coreml, directml:0, openvino, tensorrt:0, etc.)
    pub device: Option<String>,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            model: PathBuf::new(),
            conf: 0.4,
            floor_conf: 0.01,
            iou: 0.45,
            max_det: 300,
            imgsz: None,
            half: false,
            device: None,
        }
    }
}

impl TryFrom<&ModelArgs> for ul::InferenceConfig {
    type Error = AppError;

    fn try_from(args: &ModelArgs) -> std::result::Result<Self, Self::Error> {
        let mut config = Self::new()
            .with_confidence(args.floor_conf)
            .with_iou(args.iou)
            .with_half(args.half)
            .with_max_det(args.max_det)
            .with_batch(1);

        if let Some(sz) = args.imgsz {
            config = config.with_imgsz(sz, sz);
        }

        if let Some(ref device_str) = args.device {
            let device: ul::Device = device_str
                .parse()
                .map_err(|_| AppError::InvalidDevice(device_str.clone()))?;
            config = config.with_device(device);
        }

        Ok(config)
    }
}

/// YOLO model loaded through ultralytics-inference.
///
/// Inference needs `&mut` access to the engine, hence the mutex. Only one
/// detection loop runs at a time, so it is not contended.
pub struct YoloDetector {
    model: Mutex<ul::YOLOModel>,
}

impl Detector for YoloDetector {
    fn predict(&self, frame: &Frame, conf: f32) -> Result<Detections> {
        let conf = conf.clamp(0.0, 1.0);
        let image = frame.to_dynamic_image();

        let mut model = self
            .model
            .lock()
            .map_err(|_| AppError::Inference("model lock poisoned".to_string()))?;
        let results_vec = model
            .predict_image(&image, String::new())
            .map_err(|e| AppError::Inference(e.to_string()))?;

        // One image at a time
        let detections = match results_vec.first() {
            Some(r) => Detections::from(r),
            None => Detections::default(),
        };
        Ok(detections.above(conf))
    }
}

/// Load a detection model from `args.model`.
pub fn load_model(args: &ModelArgs) -> Result<YoloDetector> {
    let start_time = Instant::now();

    if !args.model.is_file() {
        return Err(AppError::ModelLoad(format!(
            "model file not found: {:?}",
            args.model
        )));
    }

    let config: ul::InferenceConfig = args.try_into()?;
    let model = ul::YOLOModel::load_with_config(&args.model, config)
        .map_err(|e| AppError::ModelLoad(e.to_string()))?;

    tracing::info!(
        "Model loaded from {:?} in {:.3?}",
        args.model,
        start_time.elapsed()
    );
    Ok(YoloDetector {
        model: Mutex::new(model),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_model_missing_file() {
        let args = ModelArgs {
            model: PathBuf::from("/nonexistent/weights.onnx"),
            ..Default::default()
        };
        match load_model(&args) {
            Err(AppError::ModelLoad(msg)) => assert!(msg.contains("not found")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected ModelLoad error"),
        }
    }
}
