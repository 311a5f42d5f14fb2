//! ストリーミング本体: キャプチャ → 姿勢検出 → 服合成 → JPEG → multipart配信。
//!
//! フレーム単位のエラーはすべてここで吸収し、元のフレームをそのまま配信する。
//! ループが終わるのはキャプチャ失敗かクライアント切断のときだけ。

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use opencv::{
    core::{Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};

use crate::camera::{self, OpenCvCamera};
use crate::overlay::{overlay_image, pose_placement, resize_garment, GarmentCache};
use crate::pose::{PoseDetector, TorsoLandmarks};

/// multipartストリームの境界名
pub const MJPEG_BOUNDARY: &str = "frame";
/// `/video_feed` レスポンスのContent-Type
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 現在選択中の服。選択APIが書き、ストリームループが毎フレーム読む。
///
/// 単一スロットの後勝ち。選択の反映が1フレーム遅れるのは許容する。
#[derive(Clone, Default)]
pub struct Selection {
    inner: Arc<Mutex<Option<String>>>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// 服を選択する。空の名前は拒否し、以前の選択を維持する。
    pub fn select(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            bail!("cloth filename must not be empty");
        }
        *self.inner.lock().unwrap() = Some(name.to_string());
        Ok(())
    }

    pub fn current(&self) -> Option<String> {
        self.inner.lock().unwrap().clone()
    }
}

/// ストリームループの動作設定
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// 鏡像表示（左右反転）
    pub mirror: bool,
    /// 配信JPEG品質 (0-100)
    pub jpeg_quality: i32,
    /// 胴体キーポイントの最低信頼度
    pub min_confidence: f32,
}

/// 1フレーム分の服合成。
///
/// 胴体と服が揃っていれば配置・リサイズ・合成を行い true を返す。
/// どちらか欠けるか配置領域が退化していればフレームはそのまま (false)。
pub fn compose_frame(
    frame: &mut Mat,
    torso: Option<&TorsoLandmarks>,
    garment: Option<&Mat>,
) -> Result<bool> {
    let (Some(torso), Some(garment)) = (torso, garment) else {
        return Ok(false);
    };

    let frame_w = frame.cols() as u32;
    let frame_h = frame.rows() as u32;
    let Some(region) = pose_placement(torso, frame_w, frame_h) else {
        return Ok(false);
    };

    let resized = resize_garment(garment, region.width(), region.height(), imgproc::INTER_LINEAR)?;
    overlay_image(frame, &resized, region.x1, region.y1)?;
    Ok(true)
}

/// JPEGエンコード
pub fn jpeg_encode(frame: &Mat, quality: i32) -> Result<Vec<u8>> {
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, quality]);
    let mut buf: Vector<u8> = Vector::new();

    // imencode は BGR 8UC3 を期待する。BGRA で届くカメラがあるので変換
    let mat = if frame.channels() == 4 {
        let mut bgr = Mat::default();
        imgproc::cvt_color_def(frame, &mut bgr, imgproc::COLOR_BGRA2BGR)?;
        bgr
    } else {
        frame.clone()
    };

    imgcodecs::imencode(".jpg", &mat, &mut buf, &params)?;
    Ok(buf.to_vec())
}

/// 1フレームをmultipartチャンクに包む
pub fn mjpeg_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(jpeg.len() + 64);
    chunk.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// ストリームループ。`emit` が false を返したら（クライアント切断）終了する。
///
/// 戻るのは正常終了（切断またはキャプチャ終端）のみ。フレーム単位の
/// エラーはログに残してそのフレームを未加工のまま流す。
pub fn run_stream(
    camera: &mut OpenCvCamera,
    detector: &mut PoseDetector,
    selection: &Selection,
    clothes_dir: &Path,
    opts: &StreamOptions,
    mut emit: impl FnMut(Vec<u8>) -> bool,
) -> Result<()> {
    let mut cache = GarmentCache::new();

    loop {
        let mut frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("[stream] capture ended: {e:#}");
                break;
            }
        };

        if opts.mirror {
            match camera::mirror(&frame) {
                Ok(flipped) => frame = flipped,
                Err(e) => eprintln!("[stream] mirror flip failed: {e:#}"),
            }
        }

        let torso = match detector.detect(&frame) {
            Ok(pose) => pose.torso(opts.min_confidence, frame.cols() as u32, frame.rows() as u32),
            Err(e) => {
                eprintln!("[stream] pose inference failed: {e:#}");
                None
            }
        };

        let garment = match (&torso, selection.current()) {
            (Some(_), Some(name)) => cache.get(clothes_dir, &name),
            _ => None,
        };

        if let Err(e) = compose_frame(&mut frame, torso.as_ref(), garment) {
            eprintln!("[stream] compositing failed: {e:#}");
        }

        let jpeg = match jpeg_encode(&frame, opts.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                eprintln!("[stream] jpeg encode failed: {e:#}");
                continue;
            }
        };

        if !emit(mjpeg_chunk(&jpeg)) {
            break;
        }
    }

    camera.release()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vec3b, CV_8UC3};

    fn solid_frame(rows: i32, cols: i32) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::new(9.0, 9.0, 9.0, 0.0))
            .unwrap()
    }

    fn mats_equal(a: &Mat, b: &Mat) -> bool {
        for row in 0..a.rows() {
            for col in 0..a.cols() {
                if a.at_2d::<Vec3b>(row, col).unwrap() != b.at_2d::<Vec3b>(row, col).unwrap() {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn test_selection_rejects_empty() {
        let selection = Selection::new();
        selection.select("shirt.png").unwrap();

        assert!(selection.select("").is_err());
        assert!(selection.select("   ").is_err());
        // 以前の選択が残る
        assert_eq!(selection.current().as_deref(), Some("shirt.png"));
    }

    #[test]
    fn test_selection_last_writer_wins() {
        let selection = Selection::new();
        assert_eq!(selection.current(), None);

        selection.select("shirt.png").unwrap();
        selection.select("jacket.png").unwrap();
        assert_eq!(selection.current().as_deref(), Some("jacket.png"));
    }

    #[test]
    fn test_mjpeg_chunk_framing() {
        let chunk = mjpeg_chunk(b"JPEG");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }

    #[test]
    fn test_compose_without_pose_is_passthrough() {
        // 10フレーム連続で人物なし -> すべて未加工で通過、エラーなし
        let garment = solid_frame(2, 2);
        let untouched = solid_frame(48, 64);

        for _ in 0..10 {
            let mut frame = solid_frame(48, 64);
            let composited = compose_frame(&mut frame, None, Some(&garment)).unwrap();
            assert!(!composited);
            assert!(mats_equal(&frame, &untouched));
        }
    }

    #[test]
    fn test_compose_without_garment_is_passthrough() {
        let torso = TorsoLandmarks {
            shoulder_left: (20, 10),
            shoulder_right: (40, 10),
            hip_left: (25, 30),
            hip_right: (35, 30),
        };
        let untouched = solid_frame(48, 64);

        let mut frame = solid_frame(48, 64);
        let composited = compose_frame(&mut frame, Some(&torso), None).unwrap();
        assert!(!composited);
        assert!(mats_equal(&frame, &untouched));
    }

    #[test]
    fn test_compose_draws_garment_in_region() {
        let torso = TorsoLandmarks {
            shoulder_left: (20, 10),
            shoulder_right: (40, 10),
            hip_left: (25, 30),
            hip_right: (35, 30),
        };
        // 肩幅20 -> 服幅40、服丈 20*1.25=25、領域 (10,7)-(50,32)
        let garment = Mat::new_rows_cols_with_default(
            2,
            2,
            CV_8UC3,
            Scalar::new(200.0, 0.0, 0.0, 0.0),
        )
        .unwrap();

        let mut frame = solid_frame(48, 64);
        let composited = compose_frame(&mut frame, Some(&torso), Some(&garment)).unwrap();
        assert!(composited);

        // 領域内は服の色、領域外は元のまま
        let inside = frame.at_2d::<Vec3b>(10, 20).unwrap();
        assert_eq!([inside[0], inside[1], inside[2]], [200, 0, 0]);
        let outside = frame.at_2d::<Vec3b>(40, 5).unwrap();
        assert_eq!([outside[0], outside[1], outside[2]], [9, 9, 9]);
    }

    #[test]
    fn test_compose_degenerate_torso_is_passthrough() {
        // 両肩が同一点 -> 配置領域なし
        let torso = TorsoLandmarks {
            shoulder_left: (30, 10),
            shoulder_right: (30, 10),
            hip_left: (25, 30),
            hip_right: (35, 30),
        };
        let garment = solid_frame(2, 2);
        let untouched = solid_frame(48, 64);

        let mut frame = solid_frame(48, 64);
        let composited = compose_frame(&mut frame, Some(&torso), Some(&garment)).unwrap();
        assert!(!composited);
        assert!(mats_equal(&frame, &untouched));
    }

    #[test]
    fn test_jpeg_encode_produces_jpeg() {
        let frame = solid_frame(16, 16);
        let jpeg = jpeg_encode(&frame, 80).unwrap();
        // JPEG SOI マーカー
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
