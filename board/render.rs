/// Page shell shared by every HTML view of the board.
const TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}}</title>
<style>
body { font-family: sans-serif; margin: 24px; color: #222; }
a { color: #1a5fb4; text-decoration: none; }
h2 { margin-top: 28px; }
.chart { border: 1px solid #e0e3e8; margin: 8px 0 18px; }
.hint { color: #999; }
pre { background: #f6f8fa; padding: 8px; white-space: pre-wrap; word-break: break-all; }
img.frame { image-rendering: pixelated; max-width: 100%; }
</style>
</head>
<body>
<p><a href="/">runs</a></p>
<h1>{{TITLE}}</h1>
{{BODY}}
</body>
</html>
"#;

/// Renders `body` inside the page shell. `title` is escaped; `body` must be
/// markup already.
pub fn render_page(title: &str, body: &str) -> String {
    TEMPLATE
        .replace("{{TITLE}}", &crate::query::html_escape(title))
        .replace("{{BODY}}", body)
}
