/// MoveNet の 17 キーポイントインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// 単一キーポイント（正規化座標 + 信頼度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    /// ピクセル座標に変換
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        let px = (self.x * width as f32) as i32;
        let py = (self.y * height as f32) as i32;
        (px, py)
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            confidence: 0.0,
        }
    }
}

/// 服の配置に使う胴体4点（ピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorsoLandmarks {
    pub shoulder_left: (i32, i32),
    pub shoulder_right: (i32, i32),
    pub hip_left: (i32, i32),
    pub hip_right: (i32, i32),
}

/// 17キーポイントからなる姿勢
#[derive(Debug, Clone)]
pub struct Pose {
    pub keypoints: [Keypoint; KeypointIndex::COUNT],
}

impl Pose {
    pub fn new(keypoints: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { keypoints }
    }

    /// インデックスでキーポイントを取得
    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.keypoints[index as usize]
    }

    /// 胴体4点をピクセル座標で取り出す。
    /// 4点すべてが閾値を超えたときのみ Some（人物検出とみなす）。
    pub fn torso(&self, min_confidence: f32, frame_w: u32, frame_h: u32) -> Option<TorsoLandmarks> {
        let pick = |index: KeypointIndex| {
            let kp = self.get(index);
            kp.is_valid(min_confidence)
                .then(|| kp.to_pixel(frame_w, frame_h))
        };

        Some(TorsoLandmarks {
            shoulder_left: pick(KeypointIndex::LeftShoulder)?,
            shoulder_right: pick(KeypointIndex::RightShoulder)?,
            hip_left: pick(KeypointIndex::LeftHip)?,
            hip_right: pick(KeypointIndex::RightHip)?,
        })
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            keypoints: [Keypoint::default(); KeypointIndex::COUNT],
        }
    }
}
