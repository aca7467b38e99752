use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{error, info};

use crate::api::{GrowiApi, GrowiHttpClient};
use crate::config::GrowiClientConfig;
use crate::source::{RecordKind, RecordSource, SourceRecord};
use crate::sync::{SyncOptions, WikiPageSync};

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Attachment bytes are written here before upload.
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub record_id: i64,
    pub title: String,
    pub path: Option<String>,
    pub action: String,
    pub attachments: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub kind: String,
    pub success: bool,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub attachments_uploaded: usize,
    pub attachments_replaced: usize,
    pub errors: Vec<String>,
    pub records: Vec<RecordResult>,
    pub request_count: usize,
}

/// Gives repeated titles within one run a `(n)` suffix, n from 2.
#[derive(Debug, Default)]
pub struct TitleAllocator {
    seen: HashMap<String, usize>,
}

impl TitleAllocator {
    pub fn allocate(&mut self, title: &str) -> String {
        let count = self.seen.entry(title.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            title.to_string()
        } else {
            format!("{title}({count})")
        }
    }
}

/// Split a stored comma-joined tag list.
pub fn parse_tags(tag_names: Option<&str>) -> Vec<String> {
    let Some(raw) = tag_names else {
        return Vec::new();
    };
    raw.replace('\u{a0}', "")
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Empty articles get their title as a heading so the page is not blank.
pub fn body_or_heading(title: &str, body: &str) -> String {
    if body.is_empty() {
        format!("## {title}")
    } else {
        body.to_string()
    }
}

/// Migrate drafts, then published articles, each through its own session.
pub fn run_migration<S: RecordSource>(
    client_config: &GrowiClientConfig,
    source: &mut S,
    options: &MigrationOptions,
    kinds: &[RecordKind],
) -> Result<Vec<MigrationReport>> {
    let mut reports = Vec::new();
    for kind in kinds {
        let api = GrowiHttpClient::new(client_config).context("failed to build GROWI HTTP client")?;
        reports.push(run_kind_with_api(api, &client_config.user, source, options, *kind)?);
    }
    Ok(reports)
}

fn run_kind_with_api<A: GrowiApi, S: RecordSource>(
    api: A,
    user: &str,
    source: &mut S,
    options: &MigrationOptions,
    kind: RecordKind,
) -> Result<MigrationReport> {
    let mut sync = WikiPageSync::connect(
        api,
        SyncOptions {
            user: user.to_string(),
            draft: kind.is_draft(),
        },
    )
    .with_context(|| format!("failed to index destination pages for {} migration", kind.as_str()))?;
    migrate_records(source, &mut sync, options)
}

/// Copy every record of the session's kind into the wiki.
///
/// A failing record is logged and reported; the run moves on to the next.
pub fn migrate_records<A: GrowiApi, S: RecordSource>(
    source: &mut S,
    sync: &mut WikiPageSync<A>,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let kind = if sync.is_draft() {
        RecordKind::Draft
    } else {
        RecordKind::Published
    };
    let records = source.records(kind)?;
    info!(kind = kind.as_str(), records = records.len(), "starting migration");

    let mut report = MigrationReport {
        kind: kind.as_str().to_string(),
        success: true,
        processed: 0,
        created: 0,
        updated: 0,
        failed: 0,
        attachments_uploaded: 0,
        attachments_replaced: 0,
        errors: Vec::new(),
        records: Vec::new(),
        request_count: 0,
    };
    let mut titles = TitleAllocator::default();

    for record in records {
        let title = titles.allocate(&record.title);
        info!(record_id = record.record_id, title = %title, "migrating record");
        report.processed += 1;
        match migrate_record(source, sync, kind, &record, &title, options) {
            Ok(result) => {
                if result.action == "created" {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                report.records.push(result);
            }
            Err(err) => {
                error!(record_id = record.record_id, title = %title, "record migration failed: {err:#}");
                report.failed += 1;
                report.errors.push(format!("{} {title}: {err:#}", record.record_id));
                report.records.push(RecordResult {
                    record_id: record.record_id,
                    title,
                    path: None,
                    action: "error".to_string(),
                    attachments: 0,
                    detail: Some(format!("{err:#}")),
                });
            }
        }
    }

    let stats = sync.stats();
    report.attachments_uploaded = stats.attachments_uploaded;
    report.attachments_replaced = stats.attachments_replaced;
    report.request_count = sync.request_count();
    report.success = report.errors.is_empty();
    Ok(report)
}

fn migrate_record<A: GrowiApi, S: RecordSource>(
    source: &mut S,
    sync: &mut WikiPageSync<A>,
    kind: RecordKind,
    record: &SourceRecord,
    title: &str,
    options: &MigrationOptions,
) -> Result<RecordResult> {
    let tags = parse_tags(record.tag_names.as_deref());
    let body = body_or_heading(title, &record.body);
    let existed = sync.page(&sync.path_for(title)).is_some();

    let mut page = sync
        .create_or_update_page(title, &tags, &body)
        .context("page upsert failed")?;

    let attachments = source.attachments(kind, record.record_id)?;
    for attachment in &attachments {
        info!(file = %attachment.file_name, "migrating attachment");
        let staged = stage_attachment(&options.staging_dir, &attachment.file_name, &attachment.bytes)?;
        let reference = sync
            .set_attachment(&mut page, &staged)
            .with_context(|| format!("attachment upload failed for {}", attachment.file_name))?;
        page.replace_attachment_reference(&attachment.file_name, &reference);
    }

    sync.update_page(&mut page).context("final page update failed")?;

    Ok(RecordResult {
        record_id: record.record_id,
        title: title.to_string(),
        path: Some(page.path.clone()),
        action: if existed { "updated" } else { "created" }.to_string(),
        attachments: attachments.len(),
        detail: None,
    })
}

/// Write attachment bytes under `staging_dir`, keeping only the base name.
pub fn stage_attachment(staging_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let base_name = Path::new(file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base_name.is_empty() || base_name == ".." {
        bail!("attachment has no usable file name: {file_name:?}");
    }
    fs::create_dir_all(staging_dir)
        .with_context(|| format!("failed to create {}", staging_dir.display()))?;
    let staged = staging_dir.join(&base_name);
    fs::write(&staged, bytes).with_context(|| format!("failed to write {}", staged.display()))?;
    Ok(staged)
}
