//! Server-rendered HTML for the search form and result pages.
//!
//! Every interpolated value goes through [`escape_html`].

use std::fmt::Write;

use reposearch_shared::SearchHit;

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 60rem; padding: 0 1rem; color: #1f2328; }
h1 a { color: inherit; text-decoration: none; }
form.search { display: flex; gap: .5rem; margin-bottom: 1.5rem; }
form.search input[type=text] { flex: 1; padding: .5rem; font-size: 1rem; }
form.search button { padding: .5rem 1rem; font-size: 1rem; }
ol.hits { list-style: none; padding: 0; }
li.hit { border: 1px solid #d0d7de; border-radius: 6px; margin-bottom: 1rem; padding: .75rem 1rem; }
li.hit .location { color: #57606a; font-size: .9rem; }
li.hit h3 { margin: .25rem 0 .5rem; font-size: 1rem; }
pre.preview { white-space: pre-wrap; background: #f6f8fa; padding: .5rem; margin: 0; }
mark { background: #fff8c5; }
p.error { color: #cf222e; }
p.hint { color: #57606a; font-size: .9rem; }
"#;

/// Escape text for use in HTML element content and double-quoted attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// The landing page: an empty search form.
pub fn render_index() -> String {
    layout("Repository search", &search_form(""), QUERY_HINT)
}

/// The results page for `query`.
pub fn render_results(query: &str, hits: &[SearchHit]) -> String {
    let mut body = search_form(query);

    if hits.is_empty() {
        let _ = write!(
            body,
            r#"<p class="summary empty">No results for <strong>{}</strong>.</p>"#,
            escape_html(query)
        );
        return layout("No results", &body, QUERY_HINT);
    }

    let _ = write!(
        body,
        r#"<p class="summary">{} result{} for <strong>{}</strong></p><ol class="hits">"#,
        hits.len(),
        if hits.len() == 1 { "" } else { "s" },
        escape_html(query)
    );
    for hit in hits {
        render_hit(&mut body, hit);
    }
    body.push_str("</ol>");

    layout(&format!("{} - search", query), &body, "")
}

/// The results page when the query could not be executed.
pub fn render_error(query: &str, message: &str) -> String {
    let mut body = search_form(query);
    let _ = write!(
        body,
        r#"<p class="error">{}</p>"#,
        escape_html(message)
    );
    layout("Search error", &body, QUERY_HINT)
}

const QUERY_HINT: &str = r#"<p class="hint">Full-text query syntax: words, <code>"exact phrases"</code>, <code>prefix*</code>, <code>AND</code> / <code>OR</code> / <code>NOT</code>, and column filters such as <code>filename:readme</code> or <code>repo_name:k8slab</code>.</p>"#;

fn render_hit(out: &mut String, hit: &SearchHit) {
    let _ = write!(
        out,
        r#"<li class="hit"><div class="location"><span class="repo">{}</span> / <span class="path">{}</span></div><h3 class="filename">{}</h3><pre class="preview">"#,
        escape_html(&hit.repo_name),
        escape_html(&hit.filepath),
        escape_html(&hit.filename),
    );
    for (text, is_match) in hit.preview_segments() {
        if is_match {
            let _ = write!(out, "<mark>{}</mark>", escape_html(text));
        } else {
            out.push_str(&escape_html(text));
        }
    }
    out.push_str("</pre></li>");
}

fn search_form(query: &str) -> String {
    format!(
        r#"<form class="search" method="post" action="/search"><input type="text" name="query" value="{}" placeholder="Search indexed repositories" autofocus><button type="submit">Search</button></form>"#,
        escape_html(query)
    )
}

fn layout(title: &str, body: &str, footer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{}</title>
<style>{STYLE}</style>
</head>
<body>
<h1><a href="/">Repository search</a></h1>
{body}
{footer}
</body>
</html>
"#,
        escape_html(title)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn hit(repo: &str, path: &str, preview: &str, highlights: Vec<(usize, usize)>) -> SearchHit {
        SearchHit {
            repo_name: repo.into(),
            filepath: path.into(),
            filename: path.rsplit('/').next().unwrap_or(path).into(),
            preview: preview.into(),
            highlights,
        }
    }

    fn select_texts(html: &str, selector: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(selector).unwrap();
        doc.select(&sel)
            .map(|el| el.text().collect::<String>())
            .collect()
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn index_page_has_search_form() {
        let html = render_index();
        let doc = Html::parse_document(&html);
        let form = Selector::parse(r#"form[action="/search"][method="post"]"#).unwrap();
        let input = Selector::parse(r#"input[name="query"]"#).unwrap();
        assert_eq!(doc.select(&form).count(), 1);
        assert_eq!(doc.select(&input).count(), 1);
    }

    #[test]
    fn results_page_lists_hits_with_marks() {
        let hits = vec![
            hit("strompris", "app/main.py", "def spot_price(): ...", vec![(4, 8)]),
            hit("k8slab", "README.md", "lab notes", vec![]),
        ];
        let html = render_results("spot", &hits);

        assert_eq!(select_texts(&html, "li.hit").len(), 2);
        assert_eq!(select_texts(&html, "span.repo"), vec!["strompris", "k8slab"]);
        assert_eq!(select_texts(&html, "span.path"), vec!["app/main.py", "README.md"]);
        assert_eq!(select_texts(&html, "h3.filename"), vec!["main.py", "README.md"]);
        assert_eq!(select_texts(&html, "mark"), vec!["spot"]);
        assert!(select_texts(&html, "p.summary")[0].starts_with("2 results"));
    }

    #[test]
    fn results_page_escapes_user_content() {
        let hits = vec![hit(
            "evil",
            "<script>.js",
            "<script>alert(1)</script>",
            vec![],
        )];
        let html = render_results("<b>q</b>", &hits);

        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>q</b>"));
        let doc = Html::parse_document(&html);
        let script = Selector::parse("script").unwrap();
        assert_eq!(doc.select(&script).count(), 0);
        assert_eq!(select_texts(&html, "pre.preview"), vec!["<script>alert(1)</script>"]);
    }

    #[test]
    fn empty_results_echo_query() {
        let html = render_results("nothing-here", &[]);
        let summary = select_texts(&html, "p.summary.empty");
        assert_eq!(summary.len(), 1);
        assert!(summary[0].contains("nothing-here"));

        let doc = Html::parse_document(&html);
        let input = Selector::parse(r#"input[name="query"]"#).unwrap();
        let value = doc.select(&input).next().unwrap().value().attr("value");
        assert_eq!(value, Some("nothing-here"));
    }

    #[test]
    fn error_page_shows_message() {
        let html = render_error("\"open", "invalid search query: unterminated string");
        assert_eq!(
            select_texts(&html, "p.error"),
            vec!["invalid search query: unterminated string"]
        );
    }
}
