mod driver;
mod replace;

pub use driver::{CancelToken, DocumentOutcome, DocumentProcessor, Mode};
pub use replace::{
    apply_content_splices, fallback_replace, replace_text_match, set_node_text, ContentSplice,
    TextOutcome,
};
