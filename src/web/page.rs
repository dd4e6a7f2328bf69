//! Server-side rendering of the chat page

use comrak::{markdown_to_html, ComrakOptions};

use crate::{
    app::{ModelStatus, Starter},
    llm::{MAX_MAX_LENGTH, MIN_MAX_LENGTH},
    session::{ConversationStats, Speaker, Turn},
};

/// Everything the page shows
pub struct PageView<'a> {
    pub turns: &'a [Turn],
    pub stats: &'a ConversationStats,
    pub starters: &'a [Starter],
    pub status: &'a ModelStatus,
    pub max_length: usize,
    pub error: Option<&'a str>,
}

/// Render an utterance as markdown. Raw HTML in the text is escaped, not
/// interpreted.
pub fn render_markdown(text: &str) -> String {
    let mut options = ComrakOptions::default();
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.escape = true;
    markdown_to_html(text, &options)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_turn(turn: &Turn) -> String {
    let class = match turn.speaker {
        Speaker::User => "turn user",
        Speaker::Bot => "turn bot",
    };
    format!(
        "<div class=\"{}\"><strong>{}:</strong>{}</div>\n",
        class,
        turn.speaker.label(),
        render_markdown(&turn.utterance)
    )
}

fn render_history(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "<p class=\"info\">Welcome! Start a conversation by typing a message below.</p>\n".to_string();
    }
    turns
        .iter()
        .map(render_turn)
        .collect::<Vec<_>>()
        .join("<hr>\n")
}

fn render_starters(starters: &[Starter]) -> String {
    starters
        .iter()
        .map(|s| {
            format!(
                "<form method=\"post\" action=\"/starter\"><input type=\"hidden\" name=\"topic\" value=\"{topic}\"><button type=\"submit\" title=\"{prompt}\">{topic}</button></form>\n",
                topic = escape_html(s.topic),
                prompt = escape_html(s.prompt),
            )
        })
        .collect()
}

pub fn render_page(view: &PageView<'_>) -> String {
    let error = view
        .error
        .map(|e| format!("<p class=\"error\">{}</p>\n", escape_html(e)))
        .unwrap_or_default();
    let status = if view.status.ready { "ready" } else { "unavailable" };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>AI Chatbot</title>
<style>
body {{ font-family: sans-serif; max-width: 60rem; margin: 2rem auto; }}
.turn.user {{ color: #1f3b73; }}
.error {{ color: #a61b1b; }}
.info {{ color: #555; }}
aside form {{ display: inline; }}
</style>
</head>
<body>
<h1>AI Conversational Chatbot</h1>
<p class="info">Model: {model} ({provider}, {status}) | Messages exchanged: {messages}</p>
{error}<main>
{history}
<form method="post" action="/send">
<label>Your message: <input type="text" name="message" placeholder="Type your message here..." autofocus></label>
<label>Max response length: <input type="number" name="max_length" min="{min}" max="{max}" value="{max_length}"></label>
<button type="submit">Send Message</button>
</form>
<form method="post" action="/clear"><button type="submit">Clear Chat History</button></form>
</main>
<aside>
<h2>Quick Starters</h2>
{starters}</aside>
</body>
</html>
"#,
        model = escape_html(&view.status.model),
        provider = escape_html(&view.status.provider),
        status = status,
        messages = view.stats.total_messages,
        error = error,
        history = render_history(view.turns),
        min = MIN_MAX_LENGTH,
        max = MAX_MAX_LENGTH,
        max_length = view.max_length,
        starters = render_starters(view.starters),
    )
}
