use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureAPIs, VideoCaptureTrait},
};

/// OpenCVを使用したカメラキャプチャ
pub struct OpenCvCamera {
    capture: VideoCapture,
    width: u32,
    height: u32,
}

impl OpenCvCamera {
    /// カメラを開く。解像度未指定ならカメラ既定値を使う。
    pub fn open(index: i32, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
            .with_context(|| format!("failed to open camera {index}"))?;

        if !capture.is_opened()? {
            anyhow::bail!("camera {} is not available", index);
        }

        if let Some(w) = width {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, w as f64)?;
        }
        if let Some(h) = height {
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, h as f64)?;
        }
        // 常に最新フレームを読む
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

        let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        eprintln!("[camera] opened index {index} at {actual_width}x{actual_height}");

        Ok(Self {
            capture,
            width: actual_width,
            height: actual_height,
        })
    }

    /// 解像度を取得
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// フレームを読み込む（BGR形式）。
    /// デバイス切断・ストリーム終端では Err を返す。
    pub fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .context("failed to read frame")?;

        if !ok || frame.empty() {
            anyhow::bail!("capture source returned no frame");
        }

        Ok(frame)
    }

    /// キャプチャデバイスを解放する
    pub fn release(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}

/// 左右反転（鏡像）したフレームを返す
pub fn mirror(frame: &Mat) -> Result<Mat> {
    let mut flipped = Mat::default();
    core::flip(frame, &mut flipped, 1)?;
    Ok(flipped)
}
