//! File types and fetched file references

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Expense file formats known to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Delimited text
    Csv,
    /// Excel workbook (.xlsx)
    Xlsx,
    /// Legacy Excel workbook (.xls)
    Xls,
    /// Word document (.docx), contract only
    Docx,
    /// Anything else, with the extension as given
    Unsupported(String),
}

impl FileType {
    /// Detect file type from an extension (case-insensitive, leading dot ignored)
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim().trim_start_matches('.');
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Self::Csv,
            "xlsx" => Self::Xlsx,
            "xls" => Self::Xls,
            "docx" => Self::Docx,
            _ => Self::Unsupported(ext.to_string()),
        }
    }

    /// Detect file type from the extension of a file name or path
    pub fn from_filename(filename: &str) -> Self {
        let base = filename.rsplit('/').next().unwrap_or(filename);
        match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Self::from_extension(ext),
            _ => Self::Unsupported(String::new()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Canonical extension
    pub fn extension(&self) -> &str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Docx => "docx",
            Self::Unsupported(ext) => ext.as_str(),
        }
    }

    /// Get display name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Csv => "CSV",
            Self::Xlsx => "Excel Spreadsheet (.xlsx)",
            Self::Xls => "Excel Spreadsheet (.xls)",
            Self::Docx => "Word Document (.docx)",
            Self::Unsupported(_) => "Unsupported",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A stored file whose bytes have already been fetched
#[derive(Debug, Clone)]
pub struct FileReference {
    /// Display name from the message
    pub name: String,
    /// Normalized object key
    pub key: String,
    /// Raw file bytes
    pub data: Vec<u8>,
    /// SHA-256 of `data`, hex encoded
    pub content_hash: String,
}

impl FileReference {
    pub fn new(name: impl Into<String>, key: impl Into<String>, data: Vec<u8>) -> Self {
        let content_hash = hash_bytes(&data);
        Self {
            name: name.into(),
            key: key.into(),
            data,
            content_hash,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Hash content for deduplication
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(FileType::from_extension("csv"), FileType::Csv);
        assert_eq!(FileType::from_extension("CSV"), FileType::Csv);
        assert_eq!(FileType::from_extension(".XlSx"), FileType::Xlsx);
        assert_eq!(FileType::from_extension("xls"), FileType::Xls);
        assert_eq!(FileType::from_extension("docx"), FileType::Docx);
        assert_eq!(
            FileType::from_extension("pdf"),
            FileType::Unsupported("pdf".to_string())
        );
        // no prefix/suffix matching
        assert!(!FileType::from_extension("csvx").is_supported());
        assert!(!FileType::from_extension("").is_supported());
    }

    #[test]
    fn test_from_filename() {
        assert_eq!(FileType::from_filename("partners/march.CSV"), FileType::Csv);
        assert_eq!(FileType::from_filename("report.final.xlsx"), FileType::Xlsx);
        assert!(!FileType::from_filename("README").is_supported());
        assert!(!FileType::from_filename(".csv").is_supported());
    }

    #[test]
    fn test_reference_hash_is_stable() {
        let a = FileReference::new("a.csv", "in/a.csv", b"x,y\n".to_vec());
        let b = FileReference::new("b.csv", "in/b.csv", b"x,y\n".to_vec());
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }
}
