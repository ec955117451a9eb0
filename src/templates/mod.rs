//! Epic/story templates: the domain types, `{{variable}}` rendering and the
//! collection store.

mod render;
mod store;
mod types;

pub use render::{RenderedIssue, RenderedTemplate};
pub use store::TemplateStore;
pub use types::{from_interchange, to_interchange, Template};

#[cfg(test)]
pub use types::{EpicDetails, StoryTemplate};
