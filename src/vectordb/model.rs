use std::collections::BTreeMap;

use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{ScoredPoint, Value};
use serde::Serialize;

/// A retrieved document and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds a document from a Qdrant hit. The text comes from `text_field`;
    /// every other string or integer payload field becomes metadata.
    pub fn from_scored_point(point: ScoredPoint, text_field: &str) -> Option<Self> {
        let id = match point.id.and_then(|pid| pid.point_id_options) {
            Some(PointIdOptions::Num(n)) => n.to_string(),
            Some(PointIdOptions::Uuid(u)) => u,
            None => return None,
        };

        let mut text = None;
        let mut metadata = BTreeMap::new();
        for (key, value) in point.payload {
            if key == text_field {
                text = value.as_str().map(|s| s.to_string());
            } else if let Some(rendered) = render_value(&value) {
                metadata.insert(key, rendered);
            }
        }

        Some(Self {
            id,
            text: text?,
            score: point.score,
            metadata,
        })
    }
}

fn render_value(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(|s| s.to_string())
        .or_else(|| value.as_integer().map(|i| i.to_string()))
}
