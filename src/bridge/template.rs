//! Message template rendering.
//!
//! Supported placeholders: `%client_id` (the client the message came from),
//! `%author`, `%msg`. `%%` produces a literal `%`; any other `%` sequence is
//! copied through untouched. Substitution is a single left-to-right pass, so
//! placeholder-like text inside an author name or message is never expanded.

/// Default template used by transports without their own markup.
pub const DEFAULT_TEMPLATE: &str = "[From %client_id] %author : %msg";

/// Placeholder names, without the leading `%`.
const CLIENT_ID: &str = "client_id";
const AUTHOR: &str = "author";
const MSG: &str = "msg";

/// Values substituted into a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    /// Client id the message originated from.
    pub client_id: &'a str,
    pub author: &'a str,
    pub msg: &'a str,
}

impl<'a> TemplateContext<'a> {
    pub fn new(client_id: &'a str, author: &'a str, msg: &'a str) -> Self {
        Self {
            client_id,
            author,
            msg,
        }
    }

    fn lookup(&self, rest: &str) -> Option<(&'a str, usize)> {
        [
            (CLIENT_ID, self.client_id),
            (AUTHOR, self.author),
            (MSG, self.msg),
        ]
        .into_iter()
        .find(|(name, _)| rest.starts_with(name))
        .map(|(name, value)| (value, name.len()))
    }
}

/// A message template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    template: String,
}

impl MessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Get the template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the template with the given context.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> String {
        render(&self.template, ctx)
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Render `template` with `ctx`. Pure: the output depends only on the inputs.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(template.len() + ctx.author.len() + ctx.msg.len());
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('%') {
            out.push('%');
            rest = tail;
        } else if let Some((value, len)) = ctx.lookup(after) {
            out.push_str(value);
            rest = &after[len..];
        } else {
            out.push('%');
            rest = after;
        }
    }

    out.push_str(rest);
    out
}
