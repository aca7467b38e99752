use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::warn;

/// A binary file attached to a wiki page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub original_name: String,
    /// Server-issued path used to embed the file from page markup.
    pub file_path_proxied: String,
}

/// A destination wiki page as known to the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub id: String,
    pub path: String,
    /// Optimistic-concurrency token; must be current for an update to succeed.
    pub revision: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub body: String,
    attachments: BTreeMap<String, Attachment>,
}

impl Page {
    pub fn new(id: impl Into<String>, path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            revision: revision.into(),
            title: None,
            tags: Vec::new(),
            body: String::new(),
            attachments: BTreeMap::new(),
        }
    }

    pub fn with_content(mut self, title: &str, tags: &[String], body: &str) -> Self {
        self.set_content(title, tags, body);
        self
    }

    pub fn set_content(&mut self, title: &str, tags: &[String], body: &str) {
        self.title = Some(title.to_string());
        self.tags = tags.to_vec();
        self.body = body.to_string();
    }

    /// Merge one page of an attachment listing into the map.
    pub fn initialize_attachments_info(&mut self, listing: impl IntoIterator<Item = Attachment>) {
        for attachment in listing {
            self.attachments.insert(attachment.id.clone(), attachment);
        }
    }

    pub fn clear_attachments_info(&mut self) {
        self.attachments.clear();
    }

    pub fn add_attachment_info(
        &mut self,
        id: impl Into<String>,
        original_name: impl Into<String>,
        file_path_proxied: impl Into<String>,
    ) {
        let id = id.into();
        self.attachments.insert(
            id.clone(),
            Attachment {
                id,
                original_name: original_name.into(),
                file_path_proxied: file_path_proxied.into(),
            },
        );
    }

    /// Live attachment with the given original file name, if any.
    pub fn attachment_info(&self, file_name: &str) -> Option<&Attachment> {
        self.attachments
            .values()
            .find(|attachment| attachment.original_name == file_name)
    }

    pub fn remove_attachment_info(&mut self, attachment_id: &str) -> Option<Attachment> {
        self.attachments.remove(attachment_id)
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Point every `![file_name](...)` in the body at `file_path_proxied`.
    ///
    /// Returns the number of references rewritten. Reference-style links and
    /// inline `<img>` tags are left alone.
    pub fn replace_attachment_reference(&mut self, file_name: &str, file_path_proxied: &str) -> usize {
        let pattern = format!(r"(!\[{}\])\([^)]*\)", regex::escape(file_name));
        let matcher = match Regex::new(&pattern) {
            Ok(matcher) => matcher,
            Err(error) => {
                warn!("cannot build reference pattern for {file_name}: {error}");
                return 0;
            }
        };

        let count = matcher.find_iter(&self.body).count();
        if count == 0 {
            return 0;
        }
        self.body = matcher
            .replace_all(&self.body, |caps: &Captures| {
                format!("{}({})", &caps[1], file_path_proxied)
            })
            .into_owned();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_body(body: &str) -> Page {
        Page::new("p1", "/alice/Intro", "r1").with_content("Intro", &[], body)
    }

    #[test]
    fn replace_attachment_reference_rewrites_exact_token() {
        let mut page = page_with_body("![logo.png](/old/path)");
        let count = page.replace_attachment_reference("logo.png", "/new/path");
        assert_eq!(count, 1);
        assert_eq!(page.body, "![logo.png](/new/path)");
    }

    #[test]
    fn replace_attachment_reference_leaves_other_files_alone() {
        let mut page = page_with_body("![logo.png](/old/a) and ![other.png](/old/b)\n![logo.png](/old/c)");
        page.replace_attachment_reference("logo.png", "/attachment/9");
        assert_eq!(
            page.body,
            "![logo.png](/attachment/9) and ![other.png](/old/b)\n![logo.png](/attachment/9)"
        );
    }

    #[test]
    fn replace_attachment_reference_treats_name_literally() {
        let mut page = page_with_body("![a+b.png](/x) ![aab.png](/y)");
        page.replace_attachment_reference("a+b.png", "/z");
        assert_eq!(page.body, "![a+b.png](/z) ![aab.png](/y)");
    }

    #[test]
    fn replace_attachment_reference_ignores_html_and_reference_links() {
        let body = "<img src=\"logo.png\">\n[logo.png]: /old\n[logo.png](/old)";
        let mut page = page_with_body(body);
        assert_eq!(page.replace_attachment_reference("logo.png", "/new"), 0);
        assert_eq!(page.body, body);
    }

    #[test]
    fn replacement_path_with_dollar_is_inserted_verbatim() {
        let mut page = page_with_body("![a.png](/old)");
        page.replace_attachment_reference("a.png", "/files/$1");
        assert_eq!(page.body, "![a.png](/files/$1)");
    }

    #[test]
    fn attachment_bookkeeping_by_name_and_id() {
        let mut page = Page::new("p1", "/alice/Intro", "r1");
        page.initialize_attachments_info(vec![
            Attachment {
                id: "a1".to_string(),
                original_name: "x.png".to_string(),
                file_path_proxied: "/attachment/a1".to_string(),
            },
            Attachment {
                id: "a2".to_string(),
                original_name: "y.png".to_string(),
                file_path_proxied: "/attachment/a2".to_string(),
            },
        ]);
        page.add_attachment_info("a3", "z.png", "/attachment/a3");

        assert_eq!(page.attachment_count(), 3);
        assert_eq!(page.attachment_info("y.png").map(|a| a.id.as_str()), Some("a2"));
        assert!(page.attachment_info("missing.png").is_none());

        let removed = page.remove_attachment_info("a2").expect("removed");
        assert_eq!(removed.original_name, "y.png");
        assert!(page.attachment_info("y.png").is_none());
        assert!(page.remove_attachment_info("a2").is_none());
    }
}
