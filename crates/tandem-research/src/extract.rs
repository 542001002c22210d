use scraper::{Html, Node, Selector};

const DROPPED_SUBTREES: &[&str] = &["script", "style", "noscript", "svg", "iframe", "head"];
const BLOCK_BOUNDARIES: &[&str] = &["p", "div", "section", "article", "li", "br", "tr"];
const PDF_RUNE_CAP: usize = 220_000;

pub struct Extracted {
    pub title: String,
    pub text: String,
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn is_block_boundary(name: &str) -> bool {
    BLOCK_BOUNDARIES.contains(&name) || is_heading(name)
}

/// Dispatches on the parsed media type (`spec.md` §4.3). Returns `None` for
/// unsupported media types, which the reader turns into
/// `unsupported_content_type`.
pub fn extract(media_type: &str, body: &str) -> Option<Extracted> {
    match media_type {
        "text/html" | "application/xhtml+xml" => Some(extract_html(body)),
        "text/plain" | "text/markdown" | "text/csv" => Some(Extracted {
            title: String::new(),
            text: body.to_string(),
        }),
        "application/json" => Some(extract_json(body)),
        "application/pdf" => Some(extract_pdf(body.as_bytes())),
        other if other.starts_with("text/") => Some(Extracted {
            title: String::new(),
            text: body.to_string(),
        }),
        _ => None,
    }
}

fn extract_html(html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();

    let mut out = String::new();
    walk_html(document.tree.root(), &mut out);
    Extracted {
        title: title.trim().to_string(),
        text: out,
    }
}

fn walk_html(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(el) => {
            let name = el.name();
            if DROPPED_SUBTREES.contains(&name) {
                return;
            }
            let boundary = is_block_boundary(name);
            if boundary {
                out.push('\n');
            }
            for child in node.children() {
                walk_html(child, out);
            }
            if boundary {
                out.push('\n');
            }
        }
        Node::Text(text) => out.push_str(text),
        _ => {
            for child in node.children() {
                walk_html(child, out);
            }
        }
    }
}

fn extract_json(body: &str) -> Extracted {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => Extracted {
            title: String::new(),
            text: serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string()),
        },
        Err(_) => Extracted {
            title: String::new(),
            text: body.to_string(),
        },
    }
}

fn extract_pdf(bytes: &[u8]) -> Extracted {
    let text = match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "pdf extraction failed");
            String::new()
        }
    };
    let joined: String = text
        .split('\n')
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let bounded: String = joined.chars().take(PDF_RUNE_CAP).collect();
    Extracted {
        title: String::new(),
        text: bounded,
    }
}

/// CRLF -> LF, UTF-8 coercion (already done by the caller via
/// `String::from_utf8_lossy`), blank-line stripping, in-line whitespace
/// collapse, trim (`spec.md` §4.3 "Normalization").
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n").trim().to_string()
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}
