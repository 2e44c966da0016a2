//! HTML rendering.
//!
//! Converts markdown bodies to HTML using comrak with GFM extensions and
//! fills the fixed site templates: initiative article, error panel, blog card
//! and the full page shell. Every metadata value interpolated here is escaped.

use chrono::{DateTime, NaiveDate};
use comrak::{
    arena_tree::NodeEdge,
    format_html,
    nodes::{AstNode, NodeValue},
    parse_document, Arena, Options,
};
use serde_json::Value;

use crate::frontmatter::{InitiativeMeta, ProjectInfo, Scalar};
use crate::posts::Post;

/// Shown for every optional metadata field that is absent.
pub const NOT_PROVIDED: &str = "Não informado";
/// Shown when an initiative has no title.
pub const UNTITLED: &str = "Iniciativa";
pub const HOME_HREF: &str = "index.html";

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// comrak options: GFM strikethrough, tables, autolinks, task lists.
/// Raw HTML in the source is omitted from the output.
fn make_options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    options.extension.tasklist = true;
    options.render.unsafe_ = false;
    options
}

/// Recursively collect the plain-text content of a node.
fn collect_text<'a>(node: &'a AstNode<'a>) -> String {
    let mut text = String::new();
    for child in node.children() {
        match &child.data.borrow().value {
            NodeValue::Text(s) => text.push_str(s),
            NodeValue::Code(c) => text.push_str(&c.literal),
            NodeValue::SoftBreak | NodeValue::LineBreak => text.push(' '),
            _ => text.push_str(&collect_text(child)),
        }
    }
    text
}

/// Render a markdown body to an HTML fragment.
pub fn render_markdown(input: &str) -> String {
    render_markdown_with_title(input).0
}

/// Render a markdown body and return the text of its first level-1 heading.
pub fn render_markdown_with_title(input: &str) -> (String, Option<String>) {
    let arena = Arena::new();
    let options = make_options();
    let root = parse_document(&arena, input, &options);

    let mut title = None;
    for edge in root.traverse() {
        if let NodeEdge::Start(node) = edge {
            if let NodeValue::Heading(nh) = &node.data.borrow().value {
                if nh.level == 1 {
                    title = Some(collect_text(node));
                    break;
                }
            }
        }
    }

    let mut html_bytes = Vec::new();
    if let Err(e) = format_html(root, &options, &mut html_bytes) {
        tracing::error!(error = %e, "markdown formatting failed");
        return (String::new(), title);
    }
    let html = String::from_utf8_lossy(&html_bytes).into_owned();
    tracing::debug!(bytes = html.len(), "markdown rendered");
    (html, title)
}

/// Minimal HTML entity escaping for text content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Initiative article
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArticle {
    /// Heading text (unescaped).
    pub title: String,
    /// `<title>` text: `"<title> - <site name>"` (unescaped).
    pub document_title: String,
    /// Hero meta markup: date and category.
    pub meta_html: String,
    /// Article body: markdown content, image gallery, project info.
    pub article_html: String,
}

fn field(value: Option<&Scalar>) -> String {
    value
        .and_then(Scalar::non_empty)
        .map(|s| html_escape(&s))
        .unwrap_or_else(|| NOT_PROVIDED.to_owned())
}

/// Display a metadata date as `dd/mm/yyyy`. Text that is not a date is shown
/// as written.
pub fn format_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%d/%m/%Y").to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%d/%m/%Y").to_string();
    }
    raw.to_owned()
}

fn render_students(info: &ProjectInfo) -> String {
    let names: Vec<String> = info
        .estudantes
        .iter()
        .filter_map(|s| {
            let nome = s.nome.as_ref().and_then(Scalar::non_empty)?;
            Some(match s.papel.as_ref().and_then(Scalar::non_empty) {
                Some(papel) => format!("{} ({})", html_escape(&nome), html_escape(&papel)),
                None => html_escape(&nome),
            })
        })
        .collect();
    if names.is_empty() {
        NOT_PROVIDED.to_owned()
    } else {
        names.join(", ")
    }
}

fn render_gallery(images: &[String]) -> String {
    let mut html = String::from("<div class=\"image-gallery\">\n");
    for src in images.iter().filter(|s| !s.trim().is_empty()) {
        html.push_str(&format!(
            "<figure><img src=\"{}\" alt=\"Imagem do projeto\" loading=\"lazy\"></figure>\n",
            html_escape(src)
        ));
    }
    html.push_str("</div>\n");
    html
}

fn render_project_info(info: Option<&ProjectInfo>) -> String {
    let empty = ProjectInfo::default();
    let info = info.unwrap_or(&empty);
    let rows = [
        ("fas fa-project-diagram", "Projeto", field(info.nome.as_ref())),
        ("fas fa-calendar-alt", "Ano", field(info.ano.as_ref())),
        ("fas fa-map-marker-alt", "Local", field(info.local.as_ref())),
        ("fas fa-users", "Estudantes", render_students(info)),
        ("fas fa-user-tie", "Coordenador", field(info.coordenador.as_ref())),
    ];
    let mut html = String::from(
        "<div class=\"project-info\">\n<h3>Informações do Projeto</h3>\n<ul>\n",
    );
    for (icon, label, value) in rows {
        html.push_str(&format!(
            "<li><i class=\"{icon}\"></i> <strong>{label}:</strong> {value}</li>\n"
        ));
    }
    html.push_str("</ul>\n</div>\n");
    html
}

/// Fill the initiative template from metadata and a markdown body.
pub fn render_initiative(meta: &InitiativeMeta, body: &str, site_name: &str) -> RenderedArticle {
    let title = meta
        .title
        .as_ref()
        .and_then(Scalar::non_empty)
        .unwrap_or_else(|| UNTITLED.to_owned());
    let document_title = format!("{title} - {site_name}");

    let date = meta
        .date
        .as_ref()
        .and_then(Scalar::non_empty)
        .map(|d| html_escape(&format_date(&d)))
        .unwrap_or_else(|| NOT_PROVIDED.to_owned());
    let category = field(meta.category.as_ref());
    let meta_html = format!(
        "<span class=\"date\"><i class=\"fas fa-calendar\"></i> {date}</span>\n\
<span class=\"category\"><i class=\"fas fa-folder\"></i> {category}</span>\n"
    );

    let content = render_markdown(body);
    let gallery = render_gallery(&meta.images);
    let info = render_project_info(meta.project_info.as_ref());
    let article_html = format!(
        "<div class=\"initiative-content markdown-content\">\n{content}</div>\n{gallery}{info}"
    );

    RenderedArticle {
        title,
        document_title,
        meta_html,
        article_html,
    }
}

// ---------------------------------------------------------------------------
// Error panels
// ---------------------------------------------------------------------------

/// Recovery offered by an error panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Link back to the home page.
    Home,
    /// Button that reloads the current page.
    Reload,
}

pub const ERROR_HEADING: &str = "Erro ao carregar a iniciativa";

/// The fixed-format error panel: heading, message, recovery action.
pub fn render_error_panel(message: &str, action: ErrorAction) -> String {
    let action_html = match action {
        ErrorAction::Home => {
            format!("<a href=\"{HOME_HREF}\" class=\"btn\">Voltar para página inicial</a>")
        }
        ErrorAction::Reload => {
            "<button onclick=\"location.reload()\" class=\"btn\">Recarregar página</button>"
                .to_owned()
        }
    };
    format!(
        "<div class=\"error-message\">\n<h2>{ERROR_HEADING}</h2>\n<p>{}</p>\n{action_html}\n</div>\n",
        html_escape(message)
    )
}

/// Placeholder inserted where a shared component failed to load.
pub fn component_error() -> String {
    "<div class=\"error-message\">\n<p>Erro ao carregar componente. Por favor, recarregue a página.</p>\n</div>\n"
        .to_owned()
}

// ---------------------------------------------------------------------------
// Blog card
// ---------------------------------------------------------------------------

/// Card markup for one blog post. The image is lazy: `data-src` is promoted
/// to `src` once the card scrolls into view.
pub fn render_post_card(post: &Post) -> String {
    let title = html_escape(&post.title);
    format!(
        "<article class=\"blog-post\">\n\
<div class=\"post-image\"><img data-src=\"{image}\" alt=\"{title}\" class=\"lazy\"></div>\n\
<div class=\"post-content\">\n\
<div class=\"post-meta\">{date} | {category}</div>\n\
<h3>{title}</h3>\n\
<p>{excerpt}</p>\n\
<a href=\"{url}\">Continuar lendo</a>\n\
</div>\n\
</article>\n",
        image = html_escape(&post.image),
        date = html_escape(&post.date),
        category = html_escape(&post.category),
        excerpt = html_escape(&post.excerpt),
        url = html_escape(&post.url),
    )
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Text for a template value. Falsy values (null, false, 0, "", missing)
/// become the empty string.
fn template_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::Bool(true)) => "true".to_owned(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| template_value(Some(v)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other @ Value::Object(_)) => other.to_string(),
    }
}

/// Replace each `${ key }` in `template` with the escaped value of
/// `data[key]`. A placeholder must close on the same line; unclosed ones are
/// left as written.
pub fn apply_template(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if !after[..end].contains('\n') => {
                out.push_str(&rest[..start]);
                let key = after[..end].trim();
                out.push_str(&html_escape(&template_value(data.get(key))));
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str(&rest[..start + 2]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Page shell
// ---------------------------------------------------------------------------

/// Inputs of [`build_page_shell`]. `heading` and `document_title` are plain
/// text; the `*_html` fields are inserted as-is.
pub struct PageShell<'a> {
    pub document_title: &'a str,
    pub heading: &'a str,
    pub meta_html: &'a str,
    pub article_html: &'a str,
    /// Header component markup, or `None` to leave the container for the
    /// client to fill.
    pub header_html: Option<&'a str>,
}

/// Build the full HTML document for an article page.
pub fn build_page_shell(shell: &PageShell) -> String {
    // Applies the saved theme and font size before first paint.
    const PREFS_INIT_SCRIPT: &str = "\
<script>(function(){\
var t=localStorage.getItem('theme');\
var dark=t==='dark'||(!t&&window.matchMedia('(prefers-color-scheme: dark)').matches);\
if(dark)document.documentElement.setAttribute('data-theme','dark');\
var f=parseInt(localStorage.getItem('fontSize'),10);\
if(f)document.documentElement.style.fontSize=f+'%';\
}());</script>";

    let title = html_escape(shell.document_title);
    let heading = html_escape(shell.heading);
    let header = shell.header_html.unwrap_or("");
    let meta_html = shell.meta_html;
    let article_html = shell.article_html;

    format!(
        "<!DOCTYPE html>\n\
<html lang=\"pt-BR\">\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title>\n\
{PREFS_INIT_SCRIPT}\n\
<link rel=\"stylesheet\" href=\"/assets/css/style.css\">\n\
</head>\n\
<body>\n\
<div id=\"header-container\">{header}</div>\n\
<section class=\"hero\">\n\
<h1 id=\"initiative-title\">{heading}</h1>\n\
<div id=\"initiative-meta\" class=\"meta\">\n{meta_html}</div>\n\
</section>\n\
<main>\n\
<article id=\"initiative-article\">\n{article_html}</article>\n\
</main>\n\
</body>\n\
</html>\n"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
