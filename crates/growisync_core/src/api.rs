use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::GrowiClientConfig;
use crate::error::SyncError;
use crate::page::Attachment;

const VERB_PAGES_LIST: &str = "pages.list";
const VERB_PAGES_CREATE: &str = "v3/pages";
const VERB_PAGES_UPDATE: &str = "pages.update";
const VERB_ATTACHMENT_LIST: &str = "v3/attachment/list";
const VERB_ATTACHMENT_ADD: &str = "attachments.add";
const VERB_ATTACHMENT_REMOVE: &str = "attachments.remove";

/// Identity of a page as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub id: String,
    pub path: String,
    pub revision: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PageUpdate<'a> {
    pub page_id: &'a str,
    pub revision: &'a str,
    pub body: &'a str,
    pub tags: &'a [String],
}

#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Page and attachment verbs of the GROWI REST API.
pub trait GrowiApi {
    fn list_pages(&mut self) -> Result<Vec<RemotePage>, SyncError>;
    fn create_page(&mut self, path: &str, body: &str) -> Result<RemotePage, SyncError>;
    /// Returns the revision token assigned by the write.
    fn update_page(&mut self, update: &PageUpdate<'_>) -> Result<String, SyncError>;
    /// One page (1-based) of a page's attachment listing; empty past the end.
    fn list_attachments(&mut self, page_id: &str, page_no: usize) -> Result<Vec<Attachment>, SyncError>;
    fn add_attachment(
        &mut self,
        page_id: &str,
        page_path: &str,
        upload: AttachmentUpload,
    ) -> Result<Attachment, SyncError>;
    fn remove_attachment(&mut self, attachment_id: &str) -> Result<(), SyncError>;
    fn request_count(&self) -> usize;
}

impl<A: GrowiApi + ?Sized> GrowiApi for &mut A {
    fn list_pages(&mut self) -> Result<Vec<RemotePage>, SyncError> {
        (**self).list_pages()
    }

    fn create_page(&mut self, path: &str, body: &str) -> Result<RemotePage, SyncError> {
        (**self).create_page(path, body)
    }

    fn update_page(&mut self, update: &PageUpdate<'_>) -> Result<String, SyncError> {
        (**self).update_page(update)
    }

    fn list_attachments(&mut self, page_id: &str, page_no: usize) -> Result<Vec<Attachment>, SyncError> {
        (**self).list_attachments(page_id, page_no)
    }

    fn add_attachment(
        &mut self,
        page_id: &str,
        page_path: &str,
        upload: AttachmentUpload,
    ) -> Result<Attachment, SyncError> {
        (**self).add_attachment(page_id, page_path, upload)
    }

    fn remove_attachment(&mut self, attachment_id: &str) -> Result<(), SyncError> {
        (**self).remove_attachment(attachment_id)
    }

    fn request_count(&self) -> usize {
        (**self).request_count()
    }
}

pub struct GrowiHttpClient {
    client: Client,
    base_url: String,
    auth: [(&'static str, String); 2],
    request_count: usize,
}

impl GrowiHttpClient {
    pub fn new(config: &GrowiClientConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(SyncError::Request)?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            auth: [
                ("access_token", config.api_token.clone()),
                ("user", config.user.clone()),
            ],
            request_count: 0,
        })
    }

    fn url(&self, verb: &str) -> String {
        format!("{}/{verb}", self.base_url)
    }

    fn get(&mut self, verb: &str, params: &[(&str, String)]) -> Result<Value, SyncError> {
        let request = self.client.get(self.url(verb)).query(&self.auth).query(params);
        self.send(verb, request)
    }

    fn post_json(&mut self, verb: &str, payload: &Value) -> Result<Value, SyncError> {
        let request = self.client.post(self.url(verb)).query(&self.auth).json(payload);
        self.send(verb, request)
    }

    fn send(&mut self, verb: &str, request: RequestBuilder) -> Result<Value, SyncError> {
        self.request_count += 1;
        debug!(verb, "GROWI API request");
        let response = request.send()?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized {
                verb: verb.to_string(),
                status: status.as_u16(),
            });
        }
        let text = response.text()?;
        if !status.is_success() {
            warn!(verb, status = status.as_u16(), body = %text, "GROWI API returned an error status");
            return Err(SyncError::rejection(verb, status.as_u16(), text));
        }
        let payload: Value = serde_json::from_str(&text).map_err(|source| SyncError::Decode {
            verb: verb.to_string(),
            source,
        })?;
        check_payload(verb, status.as_u16(), payload)
    }
}

impl GrowiApi for GrowiHttpClient {
    fn list_pages(&mut self) -> Result<Vec<RemotePage>, SyncError> {
        let payload = self.get(VERB_PAGES_LIST, &[("limit", "-1".to_string())])?;
        let parsed: PagesListResponse = decode(VERB_PAGES_LIST, payload)?;
        parsed
            .pages
            .into_iter()
            .map(|page| page.into_remote(VERB_PAGES_LIST))
            .collect()
    }

    fn create_page(&mut self, path: &str, body: &str) -> Result<RemotePage, SyncError> {
        let payload = self.post_json(VERB_PAGES_CREATE, &json!({ "body": body, "path": path }))?;
        let parsed: PageEnvelope = decode(VERB_PAGES_CREATE, payload)?;
        parsed.page.into_remote(VERB_PAGES_CREATE)
    }

    fn update_page(&mut self, update: &PageUpdate<'_>) -> Result<String, SyncError> {
        let payload = self.post_json(
            VERB_PAGES_UPDATE,
            &json!({
                "body": update.body,
                "pageTags": update.tags,
                "page_id": update.page_id,
                "revision_id": update.revision,
            }),
        )?;
        let parsed: PageEnvelope = decode(VERB_PAGES_UPDATE, payload)?;
        let page = parsed.page.into_remote(VERB_PAGES_UPDATE)?;
        Ok(page.revision)
    }

    fn list_attachments(&mut self, page_id: &str, page_no: usize) -> Result<Vec<Attachment>, SyncError> {
        let payload = self.get(
            VERB_ATTACHMENT_LIST,
            &[("pageId", page_id.to_string()), ("page", page_no.to_string())],
        )?;
        let parsed: AttachmentListResponse = decode(VERB_ATTACHMENT_LIST, payload)?;
        parsed
            .paginate_result
            .docs
            .into_iter()
            .map(|item| item.into_attachment(VERB_ATTACHMENT_LIST))
            .collect()
    }

    fn add_attachment(
        &mut self,
        page_id: &str,
        page_path: &str,
        upload: AttachmentUpload,
    ) -> Result<Attachment, SyncError> {
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)
            .map_err(SyncError::Request)?;
        let form = Form::new()
            .text("page_id", page_id.to_string())
            .text("path", page_path.to_string())
            .part("file", part);
        let request = self
            .client
            .post(self.url(VERB_ATTACHMENT_ADD))
            .query(&self.auth)
            .multipart(form);
        let payload = self.send(VERB_ATTACHMENT_ADD, request)?;
        let parsed: AttachmentEnvelope = decode(VERB_ATTACHMENT_ADD, payload)?;
        parsed.attachment.into_attachment(VERB_ATTACHMENT_ADD)
    }

    fn remove_attachment(&mut self, attachment_id: &str) -> Result<(), SyncError> {
        self.post_json(VERB_ATTACHMENT_REMOVE, &json!({ "attachment_id": attachment_id }))?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Turn an `errors`-bearing or `ok: false` payload into a rejection.
pub(crate) fn check_payload(verb: &str, status: u16, payload: Value) -> Result<Value, SyncError> {
    if let Some(errors) = payload.get("errors") {
        warn!(verb, payload = %payload, "GROWI API reported errors");
        return Err(SyncError::rejection(verb, status, errors.to_string()));
    }
    if payload.get("ok").and_then(Value::as_bool) == Some(false) {
        warn!(verb, payload = %payload, "GROWI API reported failure");
        let detail = payload
            .get("error")
            .map(|error| match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "ok=false".to_string());
        return Err(SyncError::rejection(verb, status, detail));
    }
    Ok(payload)
}

fn missing_field(verb: &str, field: &'static str) -> SyncError {
    SyncError::Decode {
        verb: verb.to_string(),
        source: <serde_json::Error as serde::de::Error>::missing_field(field),
    }
}

fn decode<T: DeserializeOwned>(verb: &str, payload: Value) -> Result<T, SyncError> {
    serde_json::from_value(payload).map_err(|source| SyncError::Decode {
        verb: verb.to_string(),
        source,
    })
}

/// Revisions arrive either as a bare id or as a populated document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RevisionRef {
    Id(String),
    Doc {
        #[serde(rename = "_id")]
        id: String,
    },
}

impl RevisionRef {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Doc { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PagesListResponse {
    #[serde(default)]
    pages: Vec<PageItem>,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    page: PageItem,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    #[serde(rename = "_id")]
    object_id: Option<String>,
    id: Option<String>,
    path: String,
    revision: Option<RevisionRef>,
}

impl PageItem {
    /// A page without an id or revision cannot be updated later.
    fn into_remote(self, verb: &str) -> Result<RemotePage, SyncError> {
        let id = self.id.or(self.object_id).ok_or_else(|| missing_field(verb, "_id"))?;
        let revision = self
            .revision
            .map(RevisionRef::into_id)
            .ok_or_else(|| missing_field(verb, "revision"))?;
        Ok(RemotePage {
            id,
            path: self.path,
            revision,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AttachmentListResponse {
    #[serde(rename = "paginateResult")]
    paginate_result: PaginateResult,
}

#[derive(Debug, Deserialize)]
struct PaginateResult {
    #[serde(default)]
    docs: Vec<AttachmentItem>,
}

#[derive(Debug, Deserialize)]
struct AttachmentEnvelope {
    attachment: AttachmentItem,
}

#[derive(Debug, Deserialize)]
struct AttachmentItem {
    #[serde(rename = "_id")]
    object_id: Option<String>,
    id: Option<String>,
    #[serde(rename = "originalName")]
    original_name: String,
    #[serde(rename = "filePathProxied")]
    file_path_proxied: String,
}

impl AttachmentItem {
    fn into_attachment(self, verb: &str) -> Result<Attachment, SyncError> {
        let id = self.id.or(self.object_id).ok_or_else(|| missing_field(verb, "_id"))?;
        Ok(Attachment {
            id,
            original_name: self.original_name,
            file_path_proxied: self.file_path_proxied,
        })
    }
}
