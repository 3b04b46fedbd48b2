//! Pre-upload file checks
//!
//! Errors make a file unacceptable; warnings are only worth a log line.

use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::UploadError;
use crate::mime::{extension_of, mime_type_for};

pub const MAX_FILE_NAME_LENGTH: usize = 255;
pub const MIN_FILE_SIZE: u64 = 1;

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "vbs", "jar", "app", "deb", "rpm", "pkg", "msi",
    "apk", "ipa",
];

const COMMON_EXTENSIONS: &[&str] = &[
    // Images
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "tiff", "tif", "heic", "heif",
    "avif", "jfif", // Video
    "mp4", "mov", "avi", "wmv", "flv", "webm", "mkv", "3gp", "3g2", "mpg", "mpeg", "ogv", "m4v",
    "asf", // Audio
    "m4a", "mp3", "wav", "flac", "aac", "ogg", "oga", "wma", "opus", "aiff", "au", "ra", "mid",
    "midi", // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "ods", "odp",
    "pages", "numbers", "keynote", // Archives
    "zip", "rar", "7z", "tar", "gz", "bz2", "xz", "dmg", "iso", // Code
    "js", "mjs", "ts", "jsx", "tsx", "json", "xml", "yaml", "yml", "toml", "py", "java", "c",
    "cpp", "h", "hpp", "cs", "php", "rb", "go", "rs", "swift", "kt", "scala", // Web
    "html", "htm", "css", "scss", "sass", "less", "md", "markdown", // Data
    "csv", "tsv", "sql", "db", "sqlite", "sqlite3", // Fonts
    "ttf", "otf", "woff", "woff2", "eot", // Design
    "psd", "ai", "eps", "indd", "sketch", "fig", // CAD and 3D
    "dwg", "dxf", "step", "stp", "iges", "igs", "stl", "obj", "fbx", "dae", "gltf", "glb",
    // eBooks
    "epub", "mobi", "azw", "azw3", // System
    "log", "conf", "cfg", "ini", "env", // Certificates
    "key", "pem", "crt", "cer", "p12", "pfx",
];

/// Extensions whose content is expected to be text.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "tsv", "json", "xml", "yaml", "yml", "toml", "md", "markdown", "html", "htm",
    "css", "log", "ini", "conf", "cfg",
];

/// Magic numbers checked against the declared extension.
const SIGNATURES: &[(&[&str], &[&[u8]])] = &[
    (
        &["jpg", "jpeg"],
        &[&[0xFF, 0xD8, 0xFF, 0xE0], &[0xFF, 0xD8, 0xFF, 0xE1], &[0xFF, 0xD8, 0xFF, 0xDB]],
    ),
    (&["png"], &[&[0x89, 0x50, 0x4E, 0x47]]),
    (&["gif"], &[&[0x47, 0x49, 0x46, 0x38]]),
    (&["pdf"], &[&[0x25, 0x50, 0x44, 0x46]]),
    (&["zip"], &[&[0x50, 0x4B, 0x03, 0x04], &[0x50, 0x4B, 0x05, 0x06]]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Code,
    Data,
    Other,
}

impl FileCategory {
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" | "ico" | "tiff" | "tif"
            | "heic" | "heif" | "avif" => FileCategory::Image,
            "mp4" | "mov" | "avi" | "wmv" | "flv" | "webm" | "mkv" | "3gp" | "3g2" | "mpg"
            | "mpeg" | "ogv" | "m4v" => FileCategory::Video,
            "m4a" | "mp3" | "wav" | "flac" | "aac" | "ogg" | "oga" | "wma" | "opus" | "aiff"
            | "au" | "ra" | "mid" | "midi" => FileCategory::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "rtf" | "odt"
            | "ods" | "odp" => FileCategory::Document,
            "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => FileCategory::Archive,
            "js" | "ts" | "jsx" | "tsx" | "py" | "java" | "c" | "cpp" | "cs" | "php" | "rb"
            | "go" | "rs" => FileCategory::Code,
            "json" | "xml" | "csv" | "sql" | "yaml" | "yml" => FileCategory::Data,
            _ => FileCategory::Other,
        }
    }
}

impl Display for FileCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Document => "document",
            FileCategory::Archive => "archive",
            FileCategory::Code => "code",
            FileCategory::Data => "data",
            FileCategory::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of validating one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file_name: String,
    pub size: u64,
    pub extension: Option<String>,
    pub category: FileCategory,
    pub mime_type: &'static str,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FileReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<FileReport, UploadError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(UploadError::ValidationFailed(self.errors))
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
}

impl FileValidator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn validate(&self, file_name: &str, content: &[u8]) -> FileReport {
        let extension = extension_of(file_name);
        let mut report = FileReport {
            file_name: file_name.to_string(),
            size: content.len() as u64,
            category: extension
                .as_deref()
                .map(FileCategory::from_extension)
                .unwrap_or(FileCategory::Other),
            mime_type: mime_type_for(file_name),
            extension,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        if file_name.trim().is_empty() {
            report.errors.push("Invalid file name".to_string());
            return report;
        }

        self.check_name(file_name, &mut report);
        self.check_size(&mut report);
        self.check_extension(&mut report);
        if !content.is_empty() {
            self.check_content(content, &mut report);
        }

        report
    }

    fn check_name(&self, file_name: &str, report: &mut FileReport) {
        if file_name
            .chars()
            .any(|c| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') || c < '\u{20}')
        {
            report
                .errors
                .push("File name contains dangerous characters".to_string());
        }

        if file_name.chars().count() > MAX_FILE_NAME_LENGTH {
            report.errors.push(format!(
                "File name too long (max {} characters)",
                MAX_FILE_NAME_LENGTH
            ));
        }

        if is_reserved_name(file_name) {
            report
                .errors
                .push("File name is reserved by system".to_string());
        }

        if file_name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')))
        {
            report
                .warnings
                .push("File name contains special characters".to_string());
        }
    }

    fn check_size(&self, report: &mut FileReport) {
        if report.size < MIN_FILE_SIZE {
            report.errors.push("File is empty".to_string());
        }

        if report.size > self.max_file_size {
            report.errors.push(format!(
                "File too large (max {}MB)",
                self.max_file_size / (1024 * 1024)
            ));
        }
    }

    fn check_extension(&self, report: &mut FileReport) {
        let Some(ext) = report.extension.as_deref() else {
            report.warnings.push("File has no extension".to_string());
            return;
        };

        if DANGEROUS_EXTENSIONS.contains(&ext) {
            report
                .errors
                .push("File type not allowed for security reasons".to_string());
        } else if !COMMON_EXTENSIONS.contains(&ext) {
            report
                .warnings
                .push("Uncommon file type - may not be supported".to_string());
        }
    }

    fn check_content(&self, content: &[u8], report: &mut FileReport) {
        let Some(ext) = report.extension.as_deref() else {
            return;
        };

        if TEXT_EXTENSIONS.contains(&ext) && content.contains(&0x00) {
            report.warnings.push("File contains null bytes".to_string());
        }

        if let Some((_, signatures)) = SIGNATURES.iter().find(|(exts, _)| exts.contains(&ext)) {
            if content.len() >= 4 && !signatures.iter().any(|sig| content.starts_with(sig)) {
                report
                    .warnings
                    .push("File content may not match extension".to_string());
            }
        }
    }
}

fn is_reserved_name(file_name: &str) -> bool {
    let upper = file_name.to_ascii_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    match stem {
        "CON" | "PRN" | "AUX" | "NUL" => true,
        _ if stem.len() == 4 && (stem.starts_with("COM") || stem.starts_with("LPT")) => {
            matches!(stem.as_bytes()[3], b'1'..=b'9')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn validator() -> FileValidator {
        FileValidator::new(50 * 1024 * 1024)
    }

    #[test]
    fn accepts_ordinary_image() {
        let report = validator().validate("holiday.png", PNG_HEADER);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.category, FileCategory::Image);
        assert_eq!(report.mime_type, "image/png");
    }

    #[test]
    fn rejects_empty_and_dangerous_files() {
        let report = validator().validate("setup.exe", b"");
        assert!(report.errors.contains(&"File is empty".to_string()));
        assert!(report
            .errors
            .contains(&"File type not allowed for security reasons".to_string()));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, UploadError::ValidationFailed(ref e) if e.len() == 2));
    }

    #[test]
    fn rejects_dangerous_characters_and_reserved_names() {
        assert!(!validator().validate("a<b>.txt", b"x").is_valid());
        assert!(!validator().validate("bad\u{0007}.txt", b"x").is_valid());
        assert!(!validator().validate("con.txt", b"x").is_valid());
        assert!(!validator().validate("LPT1", b"x").is_valid());
        assert!(validator().validate("console.txt", b"x").is_valid());
        assert!(validator().validate("COM0.txt", b"x").is_valid());
    }

    #[test]
    fn rejects_overlong_names() {
        let name = format!("{}.txt", "a".repeat(300));
        let report = validator().validate(&name, b"x");
        assert!(!report.is_valid());
    }

    #[test]
    fn rejects_oversize_content() {
        let report = FileValidator::new(4).validate("a.txt", b"12345");
        assert_eq!(report.errors, vec!["File too large (max 0MB)".to_string()]);
    }

    #[test]
    fn warns_without_rejecting() {
        let report = validator().validate("notes.weird", b"hello");
        assert!(report.is_valid());
        assert!(report
            .warnings
            .contains(&"Uncommon file type - may not be supported".to_string()));

        let report = validator().validate("README", b"hello");
        assert!(report.warnings.contains(&"File has no extension".to_string()));

        let report = validator().validate("รูปภาพ.png", PNG_HEADER);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .contains(&"File name contains special characters".to_string()));
    }

    #[test]
    fn warns_on_signature_mismatch() {
        let report = validator().validate("fake.jpg", PNG_HEADER);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .contains(&"File content may not match extension".to_string()));
    }

    #[test]
    fn warns_on_null_bytes_in_text() {
        let report = validator().validate("a.txt", b"ab\0cd");
        assert!(report.warnings.contains(&"File contains null bytes".to_string()));
    }
}
