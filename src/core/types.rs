// Request, result and API payload types

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::core::errors::PipelineError;

/// Encoded output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            other => Err(PipelineError::invalid_input(
                "format",
                format!("Unsupported output format '{}' (expected png or jpeg)", other),
            )),
        }
    }
}

/// One background removal request, discarded after the response
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub image: Arc<Vec<u8>>,
    /// Declared content type; `None` when the transport carries none (base64 JSON)
    pub content_type: Option<String>,
    pub model: String,
    pub white_background: bool,
    pub format: OutputFormat,
}

impl ProcessingRequest {
    pub fn new(image: Vec<u8>, model: impl Into<String>) -> Self {
        Self {
            image: Arc::new(image),
            content_type: None,
            model: model.into(),
            white_background: false,
            format: OutputFormat::Png,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_white_background(mut self, white_background: bool) -> Self {
        self.white_background = white_background;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Pipeline result
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Model whose session produced the mask (differs from the request after a fallback)
    pub model_used: String,
    pub white_background: bool,
}

impl ProcessedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn file_name(&self) -> String {
        format!("result.{}", self.format.extension())
    }
}

// API payloads

#[derive(Debug, Deserialize)]
pub struct RemoveBackgroundQuery {
    pub model: Option<String>,
    #[serde(default)]
    pub white_bg: bool,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Base64Request {
    pub image: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub white_bg: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Base64Response {
    pub success: bool,
    pub image: String,
    pub model_used: String,
    pub white_background: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub status: String,
    pub models: Vec<String>,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service_initialized: bool,
    pub default_model: String,
    pub loaded_models: Vec<String>,
    pub memory_management: String,
    pub inference_provider: String,
}

/// `/models` body; `models` keeps catalog order
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: ModelList,
}

/// Ordered id -> description map
#[derive(Debug, Default)]
pub struct ModelList(pub Vec<(String, String)>);

impl Serialize for ModelList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, description) in &self.0 {
            map.serialize_entry(id, description)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WarmupResponse {
    pub status: String,
    pub model_loaded: String,
}
