use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

id_newtype!(PageId);
id_newtype!(WidgetId);

/// Closed set of widget kinds a page can render. The declaration order is the
/// order used when listing the allowed values back to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Banner,
    ProductGrid,
    Text,
    Image,
    Spacer,
}

impl WidgetType {
    pub const ALL: [WidgetType; 5] = [
        WidgetType::Banner,
        WidgetType::ProductGrid,
        WidgetType::Text,
        WidgetType::Image,
        WidgetType::Spacer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WidgetType::Banner => "banner",
            WidgetType::ProductGrid => "product_grid",
            WidgetType::Text => "text",
            WidgetType::Image => "image",
            WidgetType::Spacer => "spacer",
        }
    }

    /// Comma separated list of every accepted value, e.g. for error messages.
    pub fn allowed_values() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown widget type '{0}'")]
pub struct UnknownWidgetType(pub String);

impl FromStr for WidgetType {
    type Err = UnknownWidgetType;

    // Exact, case-sensitive match; no trimming.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownWidgetType(s.to_string()))
    }
}

/// Parses a widget config supplied as raw text. Missing or blank input yields
/// an empty JSON object.
pub fn parse_widget_config(raw: Option<&str>) -> Result<serde_json::Value, serde_json::Error> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(empty_widget_config()),
    }
}

pub fn empty_widget_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
