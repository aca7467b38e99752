use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{AttachmentUpload, GrowiApi, PageUpdate};
use crate::error::SyncError;
use crate::page::Page;
use crate::path::{namespace_prefix, page_path};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// GROWI user the pages are filed under (`/{user}/...`).
    pub user: String,
    /// Work in the `draft/` namespace instead of the published one.
    pub draft: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    pub indexed_pages: usize,
    pub pages_created: usize,
    pub pages_updated: usize,
    pub attachments_uploaded: usize,
    pub attachments_replaced: usize,
}

/// Reconciles pages and attachments against one GROWI instance.
///
/// The session owns the path index built from the initial inventory. Pages
/// are matched by path, attachments by original file name, so repeating a
/// run converges on the same destination state.
pub struct WikiPageSync<A: GrowiApi> {
    api: A,
    options: SyncOptions,
    pages: BTreeMap<String, Page>,
    stats: SessionStats,
}

impl<A: GrowiApi> WikiPageSync<A> {
    /// Fetch the destination inventory and index it by path.
    pub fn connect(mut api: A, options: SyncOptions) -> Result<Self, SyncError> {
        let remote_pages = api.list_pages()?;
        let mut pages = BTreeMap::new();
        for remote in remote_pages {
            pages.insert(
                remote.path.clone(),
                Page::new(remote.id, remote.path, remote.revision),
            );
        }
        info!(
            pages = pages.len(),
            draft = options.draft,
            "indexed destination pages"
        );
        let stats = SessionStats {
            indexed_pages: pages.len(),
            ..SessionStats::default()
        };
        Ok(Self {
            api,
            options,
            pages,
            stats,
        })
    }

    pub fn is_draft(&self) -> bool {
        self.options.draft
    }

    pub fn path_for(&self, title: &str) -> String {
        page_path(&self.options.user, self.options.draft, title)
    }

    pub fn page(&self, path: &str) -> Option<&Page> {
        self.pages.get(path)
    }

    /// Indexed pages that live in this session's namespace.
    ///
    /// Published sessions exclude the draft sub-tree.
    pub fn namespace_pages(&self) -> impl Iterator<Item = &Page> {
        let prefix = namespace_prefix(&self.options.user, self.options.draft);
        let draft_prefix = namespace_prefix(&self.options.user, true);
        let draft = self.options.draft;
        self.pages.values().filter(move |page| {
            page.path.starts_with(&prefix) && (draft || !page.path.starts_with(&draft_prefix))
        })
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    pub fn request_count(&self) -> usize {
        self.api.request_count()
    }

    /// Create the page for `title`, or overwrite the one already at its path.
    pub fn create_or_update_page(
        &mut self,
        title: &str,
        tags: &[String],
        body: &str,
    ) -> Result<Page, SyncError> {
        let path = self.path_for(title);

        if let Some(existing) = self.pages.get(&path) {
            let mut page = existing.clone().with_content(title, tags, body);
            debug!(path = %path, "page exists, overwriting");
            self.initialize_attachments_info(&mut page)?;
            self.update_page(&mut page)?;
            self.stats.pages_updated += 1;
            return Ok(page);
        }

        let remote = self.api.create_page(&path, body)?;
        info!(path = %remote.path, "created page");
        let page = Page::new(remote.id, remote.path, remote.revision).with_content(title, tags, body);
        self.pages.insert(path, page.clone());
        self.stats.pages_created += 1;
        Ok(page)
    }

    /// Upload `file_path` to `page`, replacing a same-named attachment.
    ///
    /// Returns the proxied reference of the new upload. A failed upload after
    /// a successful remove leaves the page without that attachment.
    pub fn set_attachment(&mut self, page: &mut Page, file_path: &Path) -> Result<String, SyncError> {
        let Some(file_name) = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("attachment path has no file name: {}", file_path.display()),
            )));
        };
        let bytes = fs::read(file_path)?;

        let previous = page.attachment_info(&file_name).cloned();
        if let Some(previous) = &previous {
            info!(file = %file_name, attachment_id = %previous.id, "removing superseded attachment");
            self.api.remove_attachment(&previous.id)?;
            page.remove_attachment_info(&previous.id);
        }

        let upload = AttachmentUpload {
            mime_type: guess_mime_type(&file_name),
            file_name: file_name.clone(),
            bytes,
        };
        let attachment = match self.api.add_attachment(&page.id, &page.path, upload) {
            Ok(attachment) => attachment,
            Err(error) => {
                if previous.is_some() {
                    warn!(file = %file_name, path = %page.path, "upload failed after removing the previous attachment");
                }
                return Err(error);
            }
        };

        let proxied = attachment.file_path_proxied.clone();
        page.add_attachment_info(
            attachment.id,
            attachment.original_name,
            attachment.file_path_proxied,
        );
        self.stats.attachments_uploaded += 1;
        if previous.is_some() {
            self.stats.attachments_replaced += 1;
        }
        Ok(proxied)
    }

    /// Push body and tags; stores the new revision on the page and index.
    pub fn update_page(&mut self, page: &mut Page) -> Result<(), SyncError> {
        let revision = self.api.update_page(&PageUpdate {
            page_id: &page.id,
            revision: &page.revision,
            body: &page.body,
            tags: &page.tags,
        })?;
        debug!(path = %page.path, revision = %revision, "updated page");
        page.revision = revision;
        self.pages.insert(page.path.clone(), page.clone());
        Ok(())
    }

    fn initialize_attachments_info(&mut self, page: &mut Page) -> Result<(), SyncError> {
        page.clear_attachments_info();
        let mut page_no = 1;
        loop {
            let listing = self.api.list_attachments(&page.id, page_no)?;
            if listing.is_empty() {
                break;
            }
            page.initialize_attachments_info(listing);
            page_no += 1;
        }
        Ok(())
    }
}

/// MIME type inferred from a file extension.
pub fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
