use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PageId, WidgetId, WidgetType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageSummary {
    pub id: PageId,
    pub name: String,
    pub route: String,
    pub is_home: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDetail {
    #[serde(flatten)]
    pub page: PageSummary,
    pub widgets: Vec<WidgetPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageListResponse {
    pub pages: Vec<PageSummary>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WidgetPayload {
    pub id: WidgetId,
    pub page_id: PageId,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    pub position: i64,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetListResponse {
    pub widgets: Vec<WidgetPayload>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderWidgetsResponse {
    pub widgets: Vec<WidgetPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePageRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub is_home: bool,
}

/// Partial page update. `None` leaves the stored value untouched; an empty
/// string is a supplied value and gets validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_home: Option<bool>,
}

impl UpdatePageRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.route.is_none() && self.is_home.is_none()
    }
}

/// The widget type travels as a plain string so that unknown values reach
/// validation instead of failing body decoding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWidgetRequest {
    #[serde(rename = "type", default)]
    pub widget_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWidgetRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub widget_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl UpdateWidgetRequest {
    pub fn is_empty(&self) -> bool {
        self.widget_type.is_none() && self.position.is_none() && self.config.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorderWidgetsRequest {
    #[serde(default)]
    pub widget_ids: Vec<WidgetId>,
}
