use anyhow::{bail, Result};
use opencv::{
    core::{Mat, Rect, Size, Vec3b, Vec4b},
    imgproc,
    prelude::*,
};

/// 服画像を指定サイズにリサイズする
///
/// ストリーミングは INTER_LINEAR、静止画は INTER_LANCZOS4 を渡す。
pub fn resize_garment(garment: &Mat, width: i32, height: i32, interpolation: i32) -> Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(
        garment,
        &mut resized,
        Size::new(width, height),
        0.0,
        0.0,
        interpolation,
    )?;
    Ok(resized)
}

/// src を dst の (x, y) に貼り付ける。dst は書き換えられる。
///
/// - 貼り付け矩形は dst の境界で切り取る（はみ出し部分は捨てる）
/// - 4チャネル: ピクセルごとに out = a*src + (1-a)*dst
/// - 3チャネル: 不透明上書き
/// - 完全に画面外なら何もしない
pub fn overlay_image(dst: &mut Mat, src: &Mat, x: i32, y: i32) -> Result<()> {
    if dst.channels() != 3 {
        bail!("destination must be 3-channel, got {}", dst.channels());
    }

    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + src.cols()).min(dst.cols());
    let y2 = (y + src.rows()).min(dst.rows());
    if x2 <= x1 || y2 <= y1 {
        return Ok(());
    }

    match src.channels() {
        4 => {
            for row in y1..y2 {
                for col in x1..x2 {
                    let sp = *src.at_2d::<Vec4b>(row - y, col - x)?;
                    let alpha = sp[3] as f32 / 255.0;
                    let dp = dst.at_2d_mut::<Vec3b>(row, col)?;
                    for c in 0..3 {
                        let blended = alpha * sp[c] as f32 + (1.0 - alpha) * dp[c] as f32;
                        dp[c] = blended as u8;
                    }
                }
            }
        }
        3 => {
            let src_view = Mat::roi(src, Rect::new(x1 - x, y1 - y, x2 - x1, y2 - y1))?;
            let mut dst_view = Mat::roi_mut(dst, Rect::new(x1, y1, x2 - x1, y2 - y1))?;
            src_view.copy_to(&mut dst_view)?;
        }
        n => bail!("unsupported garment channel count: {}", n),
    }

    Ok(())
}
