use opencv::{core::Mat, imgcodecs, prelude::*};
use std::path::Path;

/// 選択中の服画像を1枚だけデコードして保持するキャッシュ
///
/// 選択名が変わったフレームでのみデコードし直す。デコード失敗は
/// 「服なし」として扱い、同じ名前のあいだは再試行しない。
#[derive(Default)]
pub struct GarmentCache {
    name: Option<String>,
    image: Option<Mat>,
    decode_count: u64,
}

impl GarmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 選択名に対応するデコード済み服画像を返す
    pub fn get(&mut self, dir: &Path, selection: &str) -> Option<&Mat> {
        if self.name.as_deref() != Some(selection) {
            self.name = Some(selection.to_string());
            self.decode_count += 1;
            self.image = decode(&dir.join(selection));
        }
        self.image.as_ref()
    }

    /// これまでのデコード回数
    pub fn decode_count(&self) -> u64 {
        self.decode_count
    }
}

fn decode(path: &Path) -> Option<Mat> {
    // アルファチャネルを保持するため IMREAD_UNCHANGED
    match imgcodecs::imread(path.to_string_lossy().as_ref(), imgcodecs::IMREAD_UNCHANGED) {
        Ok(image) if !image.empty() => Some(image),
        Ok(_) => {
            eprintln!("[garment] no usable image at {}", path.display());
            None
        }
        Err(e) => {
            eprintln!("[garment] decode failed for {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vector, CV_8UC3};

    fn write_png(dir: &Path, name: &str) {
        let image = Mat::new_rows_cols_with_default(
            4,
            4,
            CV_8UC3,
            Scalar::new(120.0, 130.0, 140.0, 0.0),
        )
        .unwrap();
        let path = dir.join(name);
        let ok =
            imgcodecs::imwrite(path.to_string_lossy().as_ref(), &image, &Vector::new()).unwrap();
        assert!(ok);
    }

    #[test]
    fn test_same_name_decodes_once() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "shirt.png");

        let mut cache = GarmentCache::new();
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert_eq!(cache.decode_count(), 1);
    }

    #[test]
    fn test_name_change_decodes_again() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "shirt.png");
        write_png(dir.path(), "jacket.png");

        let mut cache = GarmentCache::new();
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert!(cache.get(dir.path(), "jacket.png").is_some());
        assert_eq!(cache.decode_count(), 2);

        // 元の名前に戻すのも1回のデコード
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert_eq!(cache.decode_count(), 3);
    }

    #[test]
    fn test_missing_file_not_retried() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = GarmentCache::new();
        assert!(cache.get(dir.path(), "nothing.png").is_none());
        assert!(cache.get(dir.path(), "nothing.png").is_none());
        assert!(cache.get(dir.path(), "nothing.png").is_none());
        assert_eq!(cache.decode_count(), 1);
    }

    #[test]
    fn test_recovers_after_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "shirt.png");

        let mut cache = GarmentCache::new();
        assert!(cache.get(dir.path(), "nothing.png").is_none());
        assert!(cache.get(dir.path(), "shirt.png").is_some());
        assert_eq!(cache.decode_count(), 2);
    }
}
