//! Composes SCSS-style stylesheets into flat, per-breakpoint declarations.
//!
//! The pipeline is [`loader`] (inline `@import`s), [`parser`] (nesting,
//! variables, placeholders, mixins, breakpoint blocks), [`Composer`]
//! (token resolution, utility expansion and the cascade) and [`emitter`].

pub mod ast;
pub mod composer;
pub mod emitter;
pub mod error;
pub mod expand;
pub mod loader;
pub mod parser;
pub mod resolver;
pub mod selector;
pub mod theme;

pub use composer::Composer;
pub use error::ComposeError;
pub use theme::Theme;
