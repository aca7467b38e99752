use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::api::GrowiApi;
use crate::sync::WikiPageSync;

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub title: String,
    pub tags: Vec<String>,
    pub body_file: PathBuf,
    pub attachments: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedAttachment {
    pub file_name: String,
    pub reference: String,
    pub rewritten_references: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub path: String,
    pub action: String,
    pub revision: String,
    pub attachments: Vec<PublishedAttachment>,
}

/// Upsert one page from a markdown file and attach files to it.
///
/// References of the form `![name](...)` in the body are pointed at the
/// uploaded files before the final update.
pub fn publish_page<A: GrowiApi>(
    sync: &mut WikiPageSync<A>,
    request: &PublishRequest,
) -> Result<PublishReport> {
    let body = fs::read_to_string(&request.body_file)
        .with_context(|| format!("failed to read {}", request.body_file.display()))?;
    let existed = sync.page(&sync.path_for(&request.title)).is_some();

    let mut page = sync
        .create_or_update_page(&request.title, &request.tags, &body)
        .with_context(|| format!("failed to upsert page {}", request.title))?;

    let mut attachments = Vec::new();
    for file in &request.attachments {
        let reference = sync
            .set_attachment(&mut page, file)
            .with_context(|| format!("failed to attach {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rewritten_references = page.replace_attachment_reference(&file_name, &reference);
        attachments.push(PublishedAttachment {
            file_name,
            reference,
            rewritten_references,
        });
    }

    sync.update_page(&mut page)
        .with_context(|| format!("failed to update page {}", page.path))?;

    Ok(PublishReport {
        path: page.path,
        action: if existed { "updated" } else { "created" }.to_string(),
        revision: page.revision,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::sync::tests::{MockGrowi, options};

    #[test]
    fn publish_uploads_and_rewrites_references() {
        let temp = tempdir().expect("tempdir");
        let body_file = temp.path().join("page.md");
        fs::write(&body_file, "Intro\n\n![tora.png](/tora.png)\n").expect("write body");
        let image = temp.path().join("tora.png");
        fs::write(&image, b"tora").expect("write image");

        let mut mock = MockGrowi::new();
        let request = PublishRequest {
            title: "Client test".to_string(),
            tags: vec!["client".to_string(), "test".to_string()],
            body_file: body_file.clone(),
            attachments: vec![image.clone()],
        };

        let report = {
            let mut sync = WikiPageSync::connect(&mut mock, options(false)).expect("connect");
            publish_page(&mut sync, &request).expect("publish")
        };
        assert_eq!(report.action, "created");
        assert_eq!(report.attachments.len(), 1);
        assert_eq!(report.attachments[0].rewritten_references, 1);
        let stored = mock.page_at("/alice/Client test").expect("stored");
        assert_eq!(
            stored.body,
            format!("Intro\n\n![tora.png]({})\n", report.attachments[0].reference)
        );

        // Second publish appends to the body and adds another image.
        fs::write(
            &body_file,
            format!("{}\nMore\n\n![ojiisan.png](/ojiisan.png)\n", stored.body),
        )
        .expect("rewrite body");
        let second_image = temp.path().join("ojiisan.png");
        fs::write(&second_image, b"ojiisan").expect("write image");
        let request = PublishRequest {
            attachments: vec![second_image],
            ..request
        };
        let report = {
            let mut sync = WikiPageSync::connect(&mut mock, options(false)).expect("connect");
            publish_page(&mut sync, &request).expect("publish again")
        };
        assert_eq!(report.action, "updated");
        let stored = mock.page_at("/alice/Client test").expect("stored");
        assert_eq!(mock.attachments_of(&stored.id).len(), 2);
        assert!(stored.body.contains(&report.attachments[0].reference));
        assert_eq!(mock.pages.len(), 1);
    }

    #[test]
    fn publish_reports_missing_body_file() {
        let temp = tempdir().expect("tempdir");
        let mut mock = MockGrowi::new();
        let mut sync = WikiPageSync::connect(&mut mock, options(false)).expect("connect");
        let request = PublishRequest {
            title: "Missing".to_string(),
            tags: Vec::new(),
            body_file: temp.path().join("missing.md"),
            attachments: Vec::new(),
        };
        let error = publish_page(&mut sync, &request).expect_err("must fail");
        assert!(error.to_string().contains("failed to read"));
    }
}
