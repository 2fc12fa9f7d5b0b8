use crate::cv::BBox;
use anyhow::{Result, anyhow, bail};
use log::{debug, error, info};
use opencv::core::{CV_32F, Mat, Rect, Scalar, Size};
use opencv::dnn;
use opencv::prelude::*;
use std::time::Instant;

/// One detected face: bounding box in the coordinates of the frame that was
/// analyzed, plus the embedding computed from the face crop.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: BBox,
    pub embedding: Vec<f64>,
}

/// The recognition capability: given an RGB frame, find face regions and
/// compute one embedding per region. Implementations run on the recognition
/// worker's thread.
pub trait FaceEngine: Send {
    fn observe(&mut self, rgb: &Mat) -> Result<Vec<FaceObservation>>;
}

const DETECTOR_INPUT: i32 = 300;
const EMBEDDER_INPUT: i32 = 96;

/// Detector + embedder pair running on OpenCV's DNN module: a Caffe SSD face
/// detector and a Torch embedding network producing 128-dimensional vectors.
pub struct DnnFaceEngine {
    detector: dnn::Net,
    embedder: dnn::Net,
    min_confidence: f32,
}

impl DnnFaceEngine {
    pub fn new(
        detector_proto: &str,
        detector_model: &str,
        embedder_model: &str,
        min_confidence: f32,
    ) -> Result<Self> {
        debug!(
            "Loading face detector: proto='{detector_proto}', model='{detector_model}'"
        );
        let started = Instant::now();

        let detector = dnn::read_net_from_caffe(detector_proto, detector_model)
            .map_err(|e| anyhow!("failed to load face detector: {e}"))?;

        debug!("Loading face embedder: model='{embedder_model}'");
        let embedder = dnn::read_net_from_torch_def(embedder_model)
            .map_err(|e| anyhow!("failed to load face embedder: {e}"))?;

        info!("Recognition networks loaded in {:?}", started.elapsed());

        Ok(Self {
            detector,
            embedder,
            min_confidence,
        })
    }

    fn detect(&mut self, rgb: &Mat) -> Result<Vec<Rect>> {
        let blob = dnn::blob_from_image(
            rgb,
            1.0,
            Size::new(DETECTOR_INPUT, DETECTOR_INPUT),
            Scalar::new(104.0, 177.0, 123.0, 0.0),
            false,
            false,
            CV_32F,
        )?;

        self.detector.set_input_def(&blob)?;
        let out = self.detector.forward_single("detection_out")?;
        let view = DetectionView::new(&out)?;

        let (width, height) = (rgb.cols(), rgb.rows());
        let mut rects = Vec::new();

        for row in 0..view.count() {
            let confidence = view.at(row, 2)?;
            if confidence.is_nan() || confidence <= self.min_confidence {
                continue;
            }

            let left = ((view.at(row, 3)? * width as f32) as i32).clamp(0, width - 1);
            let top = ((view.at(row, 4)? * height as f32) as i32).clamp(0, height - 1);
            let right = ((view.at(row, 5)? * width as f32) as i32).clamp(0, width);
            let bottom = ((view.at(row, 6)? * height as f32) as i32).clamp(0, height);

            if right - left < 2 || bottom - top < 2 {
                debug!("Skipping degenerate detection at row {row}");
                continue;
            }

            rects.push(Rect::new(left, top, right - left, bottom - top));
        }

        Ok(rects)
    }

    fn embed(&mut self, face: &Mat) -> Result<Vec<f64>> {
        let blob = dnn::blob_from_image(
            face,
            1.0 / 255.0,
            Size::new(EMBEDDER_INPUT, EMBEDDER_INPUT),
            Scalar::default(),
            false,
            false,
            CV_32F,
        )?;

        self.embedder.set_input_def(&blob)?;
        // Empty name selects the network's final layer.
        let out = self.embedder.forward_single("")?;

        let data = out.data_typed::<f32>()?;
        Ok(data.iter().map(|v| *v as f64).collect())
    }
}

impl FaceEngine for DnnFaceEngine {
    fn observe(&mut self, rgb: &Mat) -> Result<Vec<FaceObservation>> {
        let started = Instant::now();
        let rects = self.detect(rgb)?;

        let mut observations = Vec::with_capacity(rects.len());
        for rect in rects {
            let face = match Mat::roi(rgb, rect).and_then(|roi| roi.try_clone()) {
                Ok(face) => face,
                Err(e) => {
                    error!("Face crop at {rect:?} failed: {e}");
                    continue;
                }
            };

            let embedding = self.embed(&face)?;
            observations.push(FaceObservation {
                bbox: BBox::new(rect.y, rect.x + rect.width, rect.y + rect.height, rect.x),
                embedding,
            });
        }

        debug!(
            "Observed {} faces in {:?}",
            observations.len(),
            started.elapsed()
        );
        Ok(observations)
    }
}

/// Typed view over the SSD detector's `[1, 1, N, 7]` output tensor.
struct DetectionView<'a> {
    rows: i32,
    data: &'a [f32],
}

impl<'a> DetectionView<'a> {
    const FIELDS: i32 = 7;

    fn new(out: &'a Mat) -> Result<Self> {
        let size = out.mat_size();
        let dims: &[i32] = &size;

        if dims.len() != 4 || dims[0] != 1 || dims[1] != 1 || dims[3] != Self::FIELDS {
            bail!("unexpected detector output shape {dims:?}");
        }

        Ok(Self {
            rows: dims[2],
            data: out.data_typed::<f32>()?,
        })
    }

    fn count(&self) -> i32 {
        self.rows
    }

    fn at(&self, row: i32, field: i32) -> Result<f32> {
        if row < 0 || row >= self.rows || field < 0 || field >= Self::FIELDS {
            bail!(
                "detection index ({row}, {field}) out of bounds for {} rows",
                self.rows
            );
        }

        Ok(self.data[(row * Self::FIELDS + field) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Scalar;

    fn detector_output(rows: i32) -> Mat {
        Mat::new_nd_with_default(&[1, 1, rows, 7], CV_32F, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn view_reads_rows_and_fields() {
        let mut out = detector_output(2);
        *out.at_nd_mut::<f32>(&[0, 0, 0, 2]).unwrap() = 0.9;
        *out.at_nd_mut::<f32>(&[0, 0, 1, 3]).unwrap() = 0.25;

        let view = DetectionView::new(&out).unwrap();
        assert_eq!(view.count(), 2);
        assert_eq!(view.at(0, 2).unwrap(), 0.9);
        assert_eq!(view.at(1, 3).unwrap(), 0.25);
        assert_eq!(view.at(1, 2).unwrap(), 0.0);
    }

    #[test]
    fn view_rejects_out_of_bounds_access() {
        let out = detector_output(1);
        let view = DetectionView::new(&out).unwrap();
        assert!(view.at(1, 0).is_err());
        assert!(view.at(0, 7).is_err());
        assert!(view.at(-1, 0).is_err());
    }

    #[test]
    fn view_rejects_unexpected_shapes() {
        let flat = Mat::new_rows_cols_with_default(4, 7, CV_32F, Scalar::all(0.0)).unwrap();
        assert!(DetectionView::new(&flat).is_err());

        let wrong_fields =
            Mat::new_nd_with_default(&[1, 1, 3, 5], CV_32F, Scalar::all(0.0)).unwrap();
        assert!(DetectionView::new(&wrong_fields).is_err());
    }
}
