//! Placeholder discovery and substitution for `.docx` templates.
//!
//! Text placeholders look like `{{NAME}}`; image placeholders like
//! `{{image:LOGO|width:200|height:100}}`. Tokens may be split across any
//! number of runs. See [`pipeline::DocumentProcessor`] for the entry points.

pub mod config;
pub mod docx;
pub mod error;
pub mod imaging;
pub mod ir;
pub mod pipeline;
pub mod placeholder;
pub mod progress;
