use anyhow::Result;
use async_trait::async_trait;

const SNIPPET_WORDS: usize = 5;

/// Produces the text of a reply to a captured post.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, post_text: &str, template: &str) -> Result<String>;
}

/// Fills `{}` in the template with the first few words of the post.
#[derive(Debug, Default, Clone)]
pub struct TemplateReplies;

fn snippet(post_text: &str) -> String {
    post_text
        .replace("<br>", " ")
        .split_whitespace()
        .take(SNIPPET_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ReplyGenerator for TemplateReplies {
    async fn generate(&self, post_text: &str, template: &str) -> Result<String> {
        Ok(template.replacen("{}", &snippet(post_text), 1))
    }
}
