use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Script,
    Image,
    Audio,
    Video,
    Diagram,
    Pdf,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Script => "script",
            AssetType::Image => "image",
            AssetType::Audio => "audio",
            AssetType::Video => "video",
            AssetType::Diagram => "diagram",
            AssetType::Pdf => "pdf",
        }
    }
}

/// A durable artifact produced or uploaded for a session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VideoAsset {
    pub id: Uuid,
    pub session_id: Uuid,
    pub asset_type: String,
    pub url: Option<String>,
    pub storage_key: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl VideoAsset {
    pub fn is(&self, asset_type: AssetType) -> bool {
        self.asset_type == asset_type.as_str()
    }
}
