use url::Url;

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_tag_blocks(html: &str, tag: &str) -> String {
    // Minimal, best-effort stripper for <tag ...> ... </tag> blocks.
    //
    // Only removes when it finds a close tag; ASCII-case-insensitive on tag names.
    let tag_lc = tag.to_ascii_lowercase();
    let open_pat = format!("<{}", tag_lc);
    let close_pat = format!("</{}>", tag_lc);

    let mut out = String::new();
    let mut i = 0usize;
    let lower = html.to_ascii_lowercase();
    while let Some(rel_start) = lower[i..].find(&open_pat) {
        let start = i + rel_start;
        let after_open = start + open_pat.len();
        if let Some(rel_end) = lower[after_open..].find(&close_pat) {
            let end = after_open + rel_end + close_pat.len();
            out.push_str(&html[i..start]);
            i = end;
        } else {
            break;
        }
    }
    out.push_str(&html[i..]);
    out
}

pub fn truncate_to_chars(s: &str, max_chars: usize) -> (String, bool) {
    let mut out = String::new();
    for (n, ch) in s.chars().enumerate() {
        if n >= max_chars {
            return (out, true);
        }
        out.push(ch);
    }
    (out, false)
}

pub fn html_title(html: &str) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let sel = html_scraper::Selector::parse("title").ok()?;
    let el = doc.select(&sel).next()?;
    let t = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

/// Text of `p`, `h1`..`h6` and `li` elements inside `body`, in document order,
/// one element per line. Script and style blocks are removed first. A page
/// without such elements yields an empty string.
pub fn readable_text(html: &str) -> String {
    let cleaned = strip_tag_blocks(&strip_tag_blocks(html, "script"), "style");
    let doc = html_scraper::Html::parse_document(&cleaned);
    let Ok(sel) = html_scraper::Selector::parse(
        "body p, body h1, body h2, body h3, body h4, body h5, body h6, body li",
    ) else {
        return String::new();
    };
    doc.select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Absolute http(s) links from `html` that stay on `page_url`'s host, in
/// document order, without fragments or duplicates. The page itself is left out.
pub fn same_site_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let Ok(sel) = html_scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = html_scraper::Html::parse_document(html);
    let mut seen = vec![strip_fragment(base.clone())];
    let mut out = Vec::new();
    for href in doc.select(&sel).filter_map(|el| el.value().attr("href")) {
        let Ok(u) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(u.scheme(), "http" | "https") || u.host_str() != base.host_str() {
            continue;
        }
        let u = strip_fragment(u);
        if !seen.contains(&u) {
            seen.push(u.clone());
            out.push(u.to_string());
        }
    }
    out
}

fn strip_fragment(mut u: Url) -> Url {
    u.set_fragment(None);
    u
}
