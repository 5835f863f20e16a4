//! Goal evaluation, card rendering, and attachment encoding.
//!
//! This crate turns one card's query result into a channel-appropriate
//! [`RenderedArtifact`](pulse_types::RenderedArtifact): an image or raw text,
//! plus CSV/XLSX attachments when the card asks for them.

pub mod attachment;
pub mod goal;
pub mod render;
pub mod text;

pub use attachment::{attachment_file_name, attachment_formats};
pub use goal::{compare_to_goal, goal_met, goal_value};
pub use render::{
    ImageRenderer, RenderConfig, Rendered, ResultRenderer, QUERY_FAILED_TEXT, RENDER_FAILED_TEXT,
};
pub use text::{format_value, scalar_text, text_table};
