//! 媒体引用与媒体处理结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
    Video,
}

/// 指向已上传媒体文件的引用（内容本身由媒体协作服务读取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    pub kind: MediaKind,
    /// 对象存储键
    pub storage_key: String,
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl MediaReference {
    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }
}

/// 音频转写结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub transcript: String,
    /// 置信度（0-1）
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub language: Option<String>,
}

/// 图像属性抽取结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    #[serde(default)]
    pub labels: Vec<String>,
    /// 图中识别出的文字
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

impl ImageAttributes {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.text.is_empty()
            && self.objects.is_empty()
            && self.colors.is_empty()
    }
}
