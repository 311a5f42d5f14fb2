use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// HTTP待ち受けアドレス
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_listen_addr() -> String { "0.0.0.0:5000".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// カメラインデックス
    #[serde(default)]
    pub index: i32,
    /// キャプチャ幅（未指定ならカメラ既定値）
    #[serde(default)]
    pub width: Option<u32>,
    /// キャプチャ高さ（未指定ならカメラ既定値）
    #[serde(default)]
    pub height: Option<u32>,
    /// 鏡像表示（左右反転）
    #[serde(default = "default_mirror")]
    pub mirror: bool,
}

fn default_mirror() -> bool { true }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: None,
            height: None,
            mirror: default_mirror(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoseConfig {
    /// MoveNet ONNXモデルのパス
    #[serde(default = "default_model")]
    pub model: String,
    /// 胴体キーポイントの最低信頼度
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_model() -> String { "movenet_lightning.onnx".to_string() }
fn default_min_confidence() -> f32 { 0.3 }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// 服画像ディレクトリ
    #[serde(default = "default_clothes_dir")]
    pub clothes_dir: String,
    /// 配信フレームのJPEG品質 (0-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
}

fn default_clothes_dir() -> String { "clothes_images".to_string() }
fn default_jpeg_quality() -> i32 { 80 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            clothes_dir: default_clothes_dir(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            camera: CameraConfig::default(),
            pose: PoseConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 設定ファイルが読めなければ既定値で起動する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "[config] {} not loaded ({e:#}), using defaults",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.camera.index, 0);
        assert!(config.camera.mirror);
        assert_eq!(config.pose.model, "movenet_lightning.onnx");
        assert_eq!(config.stream.clothes_dir, "clothes_images");
        assert_eq!(config.stream.jpeg_quality, 80);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:8080"

            [camera]
            index = 2
            width = 1280
            height = 720

            [stream]
            jpeg_quality = 95
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.camera.index, 2);
        assert_eq!(config.camera.width, Some(1280));
        assert!(config.camera.mirror);
        assert_eq!(config.stream.jpeg_quality, 95);
        // 省略したセクションは既定値
        assert!((config.pose.min_confidence - 0.3).abs() < 1e-6);
    }
}
