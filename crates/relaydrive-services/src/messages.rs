//! Notification texts sent back to the sender

use relaydrive_core::constants::MIB;
use relaydrive_core::models::{BatchSummary, FileDescriptor, OwnerQueueStatus, UploadedFile};
use relaydrive_core::ClassifiedError;

pub fn file_queued(file_name: &str, position: usize) -> String {
    format!("📥 Received {file_name} (file {position} in this batch). Upload starts once no new files arrive for a moment.")
}

pub fn batch_started(files: &[FileDescriptor]) -> String {
    let list = files
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {}", i + 1, f.file_name))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "🚀 Processing {} file(s)\n📋 Files:\n{}\n⏳ Files are uploaded one at a time.",
        files.len(),
        list
    )
}

pub fn batch_progress(current: usize, total: usize, file_name: &str) -> String {
    format!("🔄 Processing file {current}/{total}\n📁 {file_name}")
}

pub fn batch_file_succeeded(current: usize, total: usize, file: &UploadedFile) -> String {
    let next = if current < total {
        "⏭️ Moving on to the next file..."
    } else {
        "🎉 All files done!"
    };
    format!(
        "✅ Uploaded {current}/{total}\n📁 {}\n🔗 {}\n{next}",
        file.name, file.view_link
    )
}

pub fn batch_file_failed(current: usize, total: usize, file_name: &str, reason: &str) -> String {
    let next = if current < total {
        "⏭️ Moving on to the next file..."
    } else {
        "📊 See the summary below."
    };
    format!("❌ Upload failed {current}/{total}\n📁 {file_name}\n🔍 Reason: {reason}\n{next}")
}

pub fn batch_summary(summary: &BatchSummary) -> String {
    format!(
        "🎯 Batch finished\n• Files: {}\n• Succeeded: {}\n• Failed: {}\n• Time: {}s",
        summary.total_files,
        summary.success_count,
        summary.failure_count,
        summary.elapsed.as_secs()
    )
}

pub fn upload_succeeded(file: &UploadedFile) -> String {
    format!(
        "✅ Uploaded {}\n📦 {:.2} MB\n🔗 {}",
        file.name,
        file.size as f64 / MIB as f64,
        file.view_link
    )
}

pub fn upload_failed(file_name: &str, error: &ClassifiedError) -> String {
    let mut text = format!("❌ Could not upload {file_name}\n🔍 {}", error.user_message);
    if let Some(action) = &error.suggested_action {
        text.push_str(&format!("\n💡 {action}"));
    }
    text
}

pub fn queue_status(status: &OwnerQueueStatus) -> String {
    format!(
        "📊 Your uploads: {} total\n⏳ Waiting: {}\n🔄 Uploading: {}\n✅ Done: {}\n❌ Failed: {}",
        status.total, status.pending, status.processing, status.completed, status.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydrive_core::{ErrorKind, UploadError};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_batch_started_lists_files_in_order() {
        let text = batch_started(&[
            FileDescriptor::new("1", "a.txt"),
            FileDescriptor::new("2", "b.pdf"),
        ]);
        assert!(text.contains("Processing 2 file(s)"));
        assert!(text.find("1. a.txt").unwrap() < text.find("2. b.pdf").unwrap());
    }

    #[test]
    fn test_upload_failed_includes_suggestion() {
        let classified = UploadError::QuotaExceeded("full".to_string()).classify();
        assert_eq!(classified.kind, ErrorKind::QuotaExceeded);
        let text = upload_failed("a.txt", &classified);
        assert!(text.contains(&classified.user_message));
        assert!(text.contains("💡"));
    }

    #[test]
    fn test_batch_summary_counts() {
        let text = batch_summary(&BatchSummary {
            batch_id: Uuid::new_v4(),
            total_files: 3,
            success_count: 2,
            failure_count: 1,
            elapsed: Duration::from_secs(42),
        });
        assert!(text.contains("Succeeded: 2"));
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("42s"));
    }
}
