//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The inference backend contract (spec §1/§9): YOLO/YuNet/SFace are named
//! external collaborators, but the call shape a PU uses to reach them is
//! not. Grounded on `motion_ai/pipeline`'s `ctx.active_model.run(frame,
//! ...)` call in `logic/stages.rs`: one object holds the loaded network and
//! exposes a narrow `run`-style method, with a null implementation standing
//! in for tests that don't ship model files.

use anyhow::Result;
use sentrymesh_core::{BBox, FaceDetection};

/// One raw YOLO-style detection before NMS (class scores already reduced to
/// the winning class).
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub bbox: BBox,
    pub class_id: i32,
    pub confidence: f32,
}

/// A 128/512-d face embedding, not yet L2-normalised.
#[derive(Clone, Debug)]
pub struct RawEmbedding(pub Vec<f32>);

/// Object/face detection and face embedding, backed by one or more ONNX
/// networks (spec §4.4 Object Detector / Face Detector / Face Recognizer).
/// `frame` is always the full BGR frame in frame-pixel coordinates; backends
/// are responsible for their own resize/letterbox preprocessing.
pub trait InferenceBackend: Send {
    /// Runs the object-detection network (e.g. YOLO) over `frame`, already
    /// filtered to `max(score) > confidence_threshold` but *before* NMS.
    fn detect_objects(
        &mut self,
        frame_bgr: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>>;

    /// Runs the face-detection network (e.g. YuNet), returning candidates
    /// already filtered to the given confidence threshold but before NMS.
    fn detect_faces(
        &mut self,
        frame_bgr: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<FaceDetection>>;

    /// Computes an embedding for one aligned face crop (e.g. SFace).
    fn embed_face(&mut self, aligned_bgr: &[u8], width: u32, height: u32) -> Result<RawEmbedding>;
}

/// Test double: detects nothing, embeds a fixed vector. Lets the executor
/// and the PUs built on top of [`InferenceBackend`] be unit-tested without
/// ONNX model files on disk.
#[derive(Default, Clone, Copy)]
pub struct NullBackend;

impl InferenceBackend for NullBackend {
    fn detect_objects(
        &mut self,
        _frame_bgr: &[u8],
        _width: u32,
        _height: u32,
        _confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }

    fn detect_faces(
        &mut self,
        _frame_bgr: &[u8],
        _width: u32,
        _height: u32,
        _confidence_threshold: f32,
    ) -> Result<Vec<FaceDetection>> {
        Ok(Vec::new())
    }

    fn embed_face(&mut self, _aligned_bgr: &[u8], _width: u32, _height: u32) -> Result<RawEmbedding> {
        Ok(RawEmbedding(vec![0.0; 128]))
    }
}

/// ONNX Runtime backed implementation (spec §4.4). One `ort::Session` per
/// network; inputs are packed NCHW float32 tensors the way
/// `motion_ai/pipeline`'s model layer (`ctx.active_model`) is described to
/// do in `logic/stages.rs`.
pub struct OrtBackend {
    yolo: ort::session::Session,
    yunet: Option<ort::session::Session>,
    sface: Option<ort::session::Session>,
    yolo_input_size: (u32, u32),
}

impl OrtBackend {
    pub fn load(
        yolo_model_path: &str,
        yunet_model_path: Option<&str>,
        sface_model_path: Option<&str>,
        yolo_input_size: (u32, u32),
    ) -> Result<Self> {
        let yolo = ort::session::Session::builder()?.commit_from_file(yolo_model_path)?;
        let yunet = yunet_model_path
            .map(|p| ort::session::Session::builder()?.commit_from_file(p))
            .transpose()?;
        let sface = sface_model_path
            .map(|p| ort::session::Session::builder()?.commit_from_file(p))
            .transpose()?;
        Ok(Self {
            yolo,
            yunet,
            sface,
            yolo_input_size,
        })
    }

    /// BGR HWC u8 -> RGB NCHW float32 in [0,1], resized to `(nw, nh)` (spec
    /// §4.4 Object Detector "Pre-process").
    fn preprocess_nchw(bgr: &[u8], width: u32, height: u32, nw: u32, nh: u32) -> ndarray::Array4<f32> {
        let img = image::RgbImage::from_raw(
            width,
            height,
            bgr.chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        )
        .expect("frame buffer length matches width*height*3");
        let resized = image::imageops::resize(&img, nw, nh, image::imageops::FilterType::Triangle);

        let mut out = ndarray::Array4::<f32>::zeros((1, 3, nh as usize, nw as usize));
        for y in 0..nh {
            for x in 0..nw {
                let px = resized.get_pixel(x, y);
                for c in 0..3 {
                    out[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
                }
            }
        }
        out
    }
}

impl InferenceBackend for OrtBackend {
    fn detect_objects(
        &mut self,
        frame_bgr: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let (nw, nh) = self.yolo_input_size;
        let tensor = Self::preprocess_nchw(frame_bgr, width, height, nw, nh);
        let outputs = self
            .yolo
            .run(ort::inputs!["images" => tensor.view()]?)?;
        let (shape, data) = outputs[0].try_extract_raw_tensor::<f32>()?;

        // YOLO output is [1, dims, rows]; transpose to [rows, dims] as spec
        // §4.4 describes, then keep rows whose best class score clears the
        // threshold and rescale (cx,cy,w,h) back to frame pixels.
        let dims = *shape.get(1).unwrap_or(&0) as usize;
        let rows = *shape.get(2).unwrap_or(&0) as usize;
        let num_classes = dims.saturating_sub(4);
        let sx = width as f32 / nw as f32;
        let sy = height as f32 / nh as f32;

        let mut detections = Vec::new();
        for r in 0..rows {
            let at = |d: usize| data[d * rows + r];
            let (cx, cy, w, h) = (at(0), at(1), at(2), at(3));
            let mut best_score = 0.0f32;
            let mut best_class = 0i32;
            for c in 0..num_classes {
                let score = at(4 + c);
                if score > best_score {
                    best_score = score;
                    best_class = c as i32;
                }
            }
            if best_score > confidence_threshold {
                detections.push(RawDetection {
                    bbox: BBox {
                        x: (cx - w / 2.0) * sx,
                        y: (cy - h / 2.0) * sy,
                        w: w * sx,
                        h: h * sy,
                    },
                    class_id: best_class,
                    confidence: best_score,
                });
            }
        }
        Ok(detections)
    }

    fn detect_faces(
        &mut self,
        frame_bgr: &[u8],
        width: u32,
        height: u32,
        confidence_threshold: f32,
    ) -> Result<Vec<FaceDetection>> {
        let Some(yunet) = self.yunet.as_mut() else {
            return Ok(Vec::new());
        };
        let (nw, nh) = (width.min(640), height.min(640));
        let tensor = Self::preprocess_nchw(frame_bgr, width, height, nw, nh);
        let outputs = yunet.run(ort::inputs!["input" => tensor.view()]?)?;

        // Three stride heads (8/16/32): each output tensor row carries
        // objectness, class conf, box deltas and 5 landmark deltas (spec
        // §4.4 "Face Detector (YuNet)").
        let mut candidates = Vec::new();
        for (head_idx, stride) in [8u32, 16, 32].into_iter().enumerate() {
            let Some(out) = outputs.get(head_idx) else {
                continue;
            };
            let (shape, data) = out.try_extract_raw_tensor::<f32>()?;
            let cells = *shape.last().unwrap_or(&0) as usize;
            let row_len = data.len() / cells.max(1);
            if row_len < 15 {
                continue;
            }
            let grid_w = (nw / stride).max(1);
            for cell in 0..cells {
                let at = |d: usize| data[d * cells + cell];
                let cls = sigmoid(at(4));
                let obj = sigmoid(at(5));
                let conf = cls * obj;
                if conf <= confidence_threshold {
                    continue;
                }
                let gx = (cell as u32 % grid_w) as f32;
                let gy = (cell as u32 / grid_w) as f32;
                let cx = (gx + at(0)) * stride as f32;
                let cy = (gy + at(1)) * stride as f32;
                let w = at(2).exp() * stride as f32;
                let h = at(3).exp() * stride as f32;
                let mut landmarks = [(0.0f32, 0.0f32); 5];
                for i in 0..5 {
                    landmarks[i] = (
                        (gx + at(6 + i * 2)) * stride as f32 * (width as f32 / nw as f32),
                        (gy + at(7 + i * 2)) * stride as f32 * (height as f32 / nh as f32),
                    );
                }
                let sx = width as f32 / nw as f32;
                let sy = height as f32 / nh as f32;
                candidates.push(FaceDetection {
                    bbox: BBox {
                        x: (cx - w / 2.0) * sx,
                        y: (cy - h / 2.0) * sy,
                        w: w * sx,
                        h: h * sy,
                    },
                    landmarks,
                    confidence: conf,
                });
            }
        }
        Ok(candidates)
    }

    fn embed_face(&mut self, aligned_bgr: &[u8], width: u32, height: u32) -> Result<RawEmbedding> {
        let Some(sface) = self.sface.as_mut() else {
            return Ok(RawEmbedding(vec![0.0; 128]));
        };
        let tensor = Self::preprocess_nchw(aligned_bgr, width, height, width, height);
        let outputs = sface.run(ort::inputs!["data" => tensor.view()]?)?;
        let (_, data) = outputs[0].try_extract_raw_tensor::<f32>()?;
        Ok(RawEmbedding(data.to_vec()))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_detects_nothing() {
        let mut backend = NullBackend;
        let dets = backend
            .detect_objects(&[0u8; 12], 2, 2, 0.5)
            .unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn null_backend_embeds_fixed_vector() {
        let mut backend = NullBackend;
        let emb = backend.embed_face(&[0u8; 12], 2, 2).unwrap();
        assert_eq!(emb.0.len(), 128);
    }
}
