use anyhow::{Context, Result};
use opencv::core::Mat;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::keypoint::{Keypoint, KeypointIndex, Pose};
use super::preprocess::movenet_input;

/// MoveNet (singlepose) を使用した姿勢検出器
pub struct PoseDetector {
    session: Session,
}

impl PoseDetector {
    /// ONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .with_context(|| {
                format!("failed to load pose model: {}", model_path.as_ref().display())
            })?;

        Ok(Self { session })
    }

    /// フレーム(BGR)から姿勢を推定する
    ///
    /// 出力キーポイントは正規化座標。人物の有無は呼び出し側が
    /// `Pose::torso` の信頼度ゲートで判定する。
    pub fn detect(&mut self, frame: &Mat) -> Result<Pose> {
        let input = movenet_input(frame)?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .context("pose inference failed")?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .context("failed to extract pose output")?;

        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for (i, kp) in keypoints.iter_mut().enumerate() {
            *kp = Keypoint::new(output[[0, 0, i, 1]], output[[0, 0, i, 0]], output[[0, 0, i, 2]]);
        }

        Ok(Pose::new(keypoints))
    }
}
