// src/vehicle_detection.rs
//
// YOLOv8 (COCO, ONNX) vehicle detector. Letterboxes the working frame to the
// model's square input, runs one inference, keeps car/bus/truck boxes above
// the confidence threshold and applies class-agnostic NMS.

use crate::capability::VehicleDetector;
use crate::types::{BBox, Detection, Frame, VehicleClass};
use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, info};

const YOLO_CLASSES: usize = 80;
const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;

pub struct YoloDetector {
    session: Session,
    input_size: usize,
}

impl YoloDetector {
    pub fn new(model_path: &str, input_size: usize) -> Result<Self> {
        info!("Loading YOLO model: {}", model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path))?;

        info!("✓ YOLO detector initialized ({}x{})", input_size, input_size);
        Ok(Self {
            session,
            input_size,
        })
    }

    /// Letterbox + normalize, HWC u8 -> CHW f32. Returns (tensor, scale, pad_x, pad_y).
    fn preprocess(&self, src: &RgbImage) -> (Vec<f32>, f32, f32, f32) {
        let target = self.input_size as u32;
        let (src_w, src_h) = src.dimensions();

        let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale) as u32).max(1);
        let scaled_h = ((src_h as f32 * scale) as u32).max(1);

        let pad_x = (target - scaled_w) as f32 / 2.0;
        let pad_y = (target - scaled_h) as f32 / 2.0;

        let resized = image::imageops::resize(src, scaled_w, scaled_h, FilterType::Triangle);

        let mut canvas = RgbImage::from_pixel(target, target, image::Rgb([LETTERBOX_FILL; 3]));
        image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let plane = (target * target) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let idx = (y * target + x) as usize;
            for c in 0..3 {
                input[c * plane + idx] = pixel.0[c] as f32 / 255.0;
            }
        }

        (input, scale, pad_x, pad_y)
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<(Vec<f32>, usize)> {
        let shape = [1usize, 3, self.input_size, self.input_size];
        let input_value = Tensor::from_array((shape, input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (out_shape, data) = output.try_extract_tensor::<f32>()?;

        // [1, 4 + classes, predictions]
        let num_predictions = out_shape
            .get(2)
            .copied()
            .context("unexpected YOLO output rank")? as usize;

        Ok((data.to_vec(), num_predictions))
    }

    fn postprocess(
        &self,
        output: &[f32],
        num_predictions: usize,
        scale: f32,
        pad_x: f32,
        pad_y: f32,
        conf_thresh: f32,
    ) -> Vec<Detection> {
        let n = num_predictions;
        if output.len() < n * (4 + YOLO_CLASSES) {
            return Vec::new();
        }

        let mut detections = Vec::new();

        for i in 0..n {
            let cx = output[i];
            let cy = output[n + i];
            let w = output[n * 2 + i];
            let h = output[n * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..YOLO_CLASSES {
                let conf = output[n * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < conf_thresh {
                continue;
            }
            let Some(class) = VehicleClass::from_coco_id(best_class) else {
                continue;
            };

            // Undo letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection::new(
                BBox::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
                max_conf,
                class,
            ));
        }

        nms(detections, NMS_IOU_THRESHOLD)
    }
}

impl VehicleDetector for YoloDetector {
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = self.preprocess(&frame.image);
        let (output, num_predictions) = self.infer(input)?;
        let detections =
            self.postprocess(&output, num_predictions, scale, pad_x, pad_y, confidence_threshold);

        debug!("Frame {}: {} vehicles", frame.index, detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .all(|kept| calculate_iou(&kept.bbox, &det.bbox) < iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

fn calculate_iou(a: &BBox, b: &BBox) -> f32 {
    let inter = BBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2));
    let intersection = inter.area();
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
