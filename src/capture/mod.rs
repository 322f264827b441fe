mod pipeline;
mod reply;

pub use pipeline::{CapturePipeline, CaptureSummary};
pub use reply::{ReplyGenerator, TemplateReplies};
