//! Queue messages and the file payload they carry

use serde::{Deserialize, Serialize};

use super::file::FileType;
use crate::error::{Error, Result};

/// A unit of work received from a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Queue-assigned message id, stable across redeliveries
    pub message_id: String,
    /// Opaque payload
    pub body: String,
    /// Token required to delete this delivery
    pub receipt_handle: String,
    /// How many times the message has been received, this delivery included
    pub receive_count: u32,
}

/// Body of an expense message: which stored file to process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    /// File name as uploaded by the partner
    pub name: String,
    /// Object path in the bucket
    pub path: String,
    /// Explicit file type; derived from `name` or `path` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file_type: None,
        }
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    /// Decode a message body
    pub fn from_body(body: &str) -> Result<Self> {
        let payload: FilePayload = serde_json::from_str(body)
            .map_err(|e| Error::InvalidMessage(format!("body is not a file payload: {}", e)))?;

        if payload.path.trim().is_empty() {
            return Err(Error::InvalidMessage("payload has an empty path".to_string()));
        }

        Ok(payload)
    }

    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// File type string handed to the dispatcher
    pub fn resolved_file_type(&self) -> String {
        if let Some(explicit) = self.file_type.as_deref().filter(|t| !t.trim().is_empty()) {
            return explicit.trim().to_string();
        }

        match FileType::from_filename(&self.name) {
            FileType::Unsupported(_) => FileType::from_filename(&self.path).to_string(),
            known => known.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_body() {
        let body = r#"{"name": "march.xlsx", "path": "partners/42/march.xlsx"}"#;
        let payload = FilePayload::from_body(body).unwrap();
        assert_eq!(payload.name, "march.xlsx");
        assert_eq!(payload.resolved_file_type(), "xlsx");
    }

    #[test]
    fn test_explicit_file_type_wins() {
        let payload = FilePayload::new("upload", "partners/42/upload").with_file_type("CSV");
        assert_eq!(payload.resolved_file_type(), "CSV");
    }

    #[test]
    fn test_file_type_falls_back_to_path() {
        let payload = FilePayload::new("march", "partners/42/march.csv");
        assert_eq!(payload.resolved_file_type(), "csv");
    }

    #[test]
    fn test_invalid_bodies() {
        assert!(matches!(
            FilePayload::from_body("why hello there"),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(
            FilePayload::from_body(r#"{"name": "a.csv", "path": "  "}"#),
            Err(Error::InvalidMessage(_))
        ));
    }
}
