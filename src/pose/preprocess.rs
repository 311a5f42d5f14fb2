use anyhow::Result;
use ndarray::Array4;
use opencv::{
    core::{AlgorithmHint, Mat, Size, Vec3b},
    imgproc,
    prelude::*,
};

/// MoveNet入力の一辺（ピクセル）
pub const MOVENET_INPUT_SIZE: i32 = 192;

/// カメラフレーム(BGR)をMoveNet入力テンソルに変換
///
/// - 192x192 にリサイズ
/// - BGR -> RGB
/// - [1, 192, 192, 3] の f32 テンソル (0.0-255.0)
pub fn movenet_input(frame: &Mat) -> Result<Array4<f32>> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut rgb = Mat::default();
    imgproc::cvt_color(
        &resized,
        &mut rgb,
        imgproc::COLOR_BGR2RGB,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;

    let size = MOVENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

    for y in 0..MOVENET_INPUT_SIZE {
        for x in 0..MOVENET_INPUT_SIZE {
            let pixel = rgb.at_2d::<Vec3b>(y, x)?;
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
            }
        }
    }

    Ok(tensor)
}
