pub mod directives;
pub mod domain;
pub mod pipeline;
pub mod traits;
