/// Sub-path that keeps drafts apart from published pages of the same title.
pub const DRAFT_SEGMENT: &str = "draft";

/// Characters GROWI treats structurally in a page path, with the full-width
/// form each is replaced by inside a title.
const RESERVED_SUBSTITUTIONS: &[(char, char)] = &[
    ('^', '＾'),
    ('$', '＄'),
    ('*', '＊'),
    ('%', '％'),
    ('?', '？'),
    ('/', '／'),
];

/// Escape a title so it lands in exactly one path segment.
pub fn escape_title(title: &str) -> String {
    title
        .chars()
        .map(|ch| {
            RESERVED_SUBSTITUTIONS
                .iter()
                .find(|(reserved, _)| *reserved == ch)
                .map_or(ch, |(_, replacement)| *replacement)
        })
        .collect()
}

/// Destination path of a page: `/{user}/[draft/]{escaped title}`.
pub fn page_path(user: &str, draft: bool, title: &str) -> String {
    let mut path = format!("/{user}/");
    if draft {
        path.push_str(DRAFT_SEGMENT);
        path.push('/');
    }
    path.push_str(&escape_title(title));
    path
}

/// Path prefix every page of the given namespace sits under.
pub fn namespace_prefix(user: &str, draft: bool) -> String {
    if draft {
        format!("/{user}/{DRAFT_SEGMENT}/")
    } else {
        format!("/{user}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_path_escapes_slash_and_question_mark() {
        let path = page_path("alice", false, "A/B?C");
        assert_eq!(path, "/alice/A／B？C");
        let title_part = path.strip_prefix("/alice/").expect("prefix");
        assert!(!title_part.contains(['^', '$', '*', '%', '?', '/']));
    }

    #[test]
    fn all_reserved_characters_are_replaced() {
        assert_eq!(escape_title("^$*%?/"), "＾＄＊％？／");
        assert_eq!(escape_title("plain title"), "plain title");
    }

    #[test]
    fn draft_and_published_paths_differ() {
        let published = page_path("alice", false, "Intro");
        let draft = page_path("alice", true, "Intro");
        assert_eq!(published, "/alice/Intro");
        assert_eq!(draft, "/alice/draft/Intro");
        assert_ne!(published, draft);
    }

    #[test]
    fn draft_prefix_is_nested_in_published_prefix() {
        assert_eq!(namespace_prefix("bob", false), "/bob/");
        assert_eq!(namespace_prefix("bob", true), "/bob/draft/");
    }
}
