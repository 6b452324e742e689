//! Page text sampling: a bounded, whitespace-normalized snippet of the
//! most relevant content container, plus the cheap content fingerprint the
//! mutation debounce compares.

use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};

/// Containers tried in priority order before falling back to `body`.
const CONTENT_SELECTORS: &[&str] = &["main", "article", "[role=\"main\"]", "body"];

/// Substructures skipped while reading text.
const EXCLUDED_ELEMENTS: &[&str] = &["script", "style", "nav", "footer", "header", "aside"];
const EXCLUDED_CLASSES: &[&str] = &["nav", "menu", "footer"];

/// Extract up to `max_words` whitespace-delimited tokens from the page's
/// main content. Traversal skips non-content subtrees and never touches
/// the input markup; whitespace runs collapse to single spaces.
pub fn extract(html: &str, max_words: usize) -> String {
    let document = Html::parse_document(html);
    let Some(root) = content_root(&document) else {
        return String::new();
    };

    let mut raw = String::new();
    collect_text(*root, &mut raw);

    raw.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The document title, if present and non-empty.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document
        .select(&selector)
        .next()
        .map(|elem| elem.text().collect::<Vec<_>>().join(" "))?;
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Signed-32-bit rolling hash over the first `words` sampled tokens.
/// Identical hashes mean the observed content has not meaningfully changed.
pub fn fingerprint(html: &str, words: usize) -> i32 {
    rolling_hash(&extract(html, words))
}

fn rolling_hash(text: &str) -> i32 {
    let mut hash: i32 = 0;
    // UTF-16 code units, so multi-byte text hashes consistently with hosts
    // that index strings the same way.
    for unit in text.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    hash
}

fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    for raw in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(elem) = document.select(&selector).next() {
            return Some(elem);
        }
    }
    None
}

fn is_excluded(elem: &scraper::node::Element) -> bool {
    EXCLUDED_ELEMENTS.contains(&elem.name())
        || elem.classes().any(|class| EXCLUDED_CLASSES.contains(&class))
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                out.push(' ');
                out.push_str(&text.text);
            }
            Node::Element(elem) => {
                if !is_excluded(elem) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_main_over_body() {
        let html = r#"
            <html><body>
              <div>sidebar noise</div>
              <main><p>signal text here</p></main>
            </body></html>"#;
        assert_eq!(extract(html, 500), "signal text here");
    }

    #[test]
    fn falls_back_to_article_then_body() {
        let article = "<body><article><p>from article</p></article><p>outside</p></body>";
        assert_eq!(extract(article, 500), "from article");

        let body_only = "<body><p>plain body text</p></body>";
        assert_eq!(extract(body_only, 500), "plain body text");
    }

    #[test]
    fn skips_non_content_subtrees() {
        let html = r#"
            <main>
              <nav>menu items</nav>
              <script>var x = 1;</script>
              <style>.a { color: red }</style>
              <header>site header</header>
              <p>kept paragraph</p>
              <div class="menu">hamburger</div>
              <footer>copyright</footer>
            </main>"#;
        assert_eq!(extract(html, 500), "kept paragraph");
    }

    #[test]
    fn collapses_whitespace_and_truncates_words() {
        let html = "<body><p>one\n\n  two\tthree four five</p></body>";
        assert_eq!(extract(html, 3), "one two three");
    }

    #[test]
    fn reads_document_title() {
        let html = "<html><head><title>  A   Page </title></head><body></body></html>";
        assert_eq!(page_title(html).as_deref(), Some("A Page"));
        assert_eq!(page_title("<body></body>"), None);
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = "<body><p>the quick brown fox</p></body>";
        let b = "<body><p>the quick brown fox</p></body>";
        let c = "<body><p>a completely different page</p></body>";

        assert_eq!(fingerprint(a, 100), fingerprint(b, 100));
        assert_ne!(fingerprint(a, 100), fingerprint(c, 100));
    }

    #[test]
    fn fingerprint_ignores_changes_past_the_window() {
        let a = "<body><p>alpha beta gamma</p></body>";
        let b = "<body><p>alpha beta delta</p></body>";
        assert_eq!(fingerprint(a, 2), fingerprint(b, 2));
        assert_ne!(fingerprint(a, 3), fingerprint(b, 3));
    }
}
