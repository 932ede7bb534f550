//! `vexpr_core` is an embeddable expression and template language for inline
//! personalization. Authors write small expressions such as
//! `{{ user.name | default 'friend' }}` in otherwise static markup; the engine
//! finds them, evaluates them against a host data store and substitutes the
//! escaped result.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Markup
//!   → Scanner (finds {{ }}, {{{ }}} and {{-- --}} spans, masks code regions)
//!   → AST cache (source text → parsed tree)
//!   → Lexer + parser on a cache miss (tokens → immutable tree)
//!   → Evaluator (walks the tree, resolving roots and members through the Context and applying filters)
//!   → Scanner (escapes or sanitizes each value and substitutes it)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: configuration loading from `vexpr.toml`.
//! - [`store`]: an in-memory [`DataProvider`] loadable from JSON, TOML or YAML.
//!
//! ## Key Types
//!
//! - [`Engine`]: a rendering session with [`Engine::scan`],
//!   [`Engine::evaluate_expression`] and the content-protection toggle.
//! - [`Context`]: root and member resolution with the cycle guard.
//! - [`DataProvider`] and [`Hooks`]: what the host supplies.
//! - [`Value`]: runtime values, including [`SafeString`].
//! - [`AstCache`]: the shared, bounded cache of parsed expressions.
//!
//! ## Expressions
//!
//! ```text
//! {{ post.title | upper }}
//! {{ user.is_logged_in ? 'Welcome back' : 'Hello' }}
//! {{ post.date | date 'Y-m-d' }}
//! {{ user.meta.favorite_color | default 'blue' }}
//! {{{ post.excerpt | raw }}}
//! {{-- a note for editors --}}
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use vexpr_core::Engine;
//! use vexpr_core::Entity;
//! use vexpr_core::EntityKind;
//! use vexpr_core::store::MemoryStore;
//!
//! let store = MemoryStore::new()
//! 	.with_principal(Entity::new(EntityKind::Principal, 1).with_field("display_name", "Ada"))
//! 	.with_current_principal(1);
//! let mut engine = Engine::builder(Arc::new(store)).build().unwrap();
//!
//! assert_eq!(engine.scan("Hi {{ user.name }}!"), "Hi Ada!");
//! ```

pub use ast::*;
pub use ast_cache::*;
pub use context::*;
pub use date::*;
pub use engine::*;
pub use error::*;
pub use hooks::*;
pub use html::*;
pub use lexer::tokenize;
pub use library::*;
pub use logic::*;
pub use meta::*;
pub use parser::MAX_NESTING;
pub use parser::parse;
pub use scanner::*;
pub use tokens::*;
pub use value::*;

mod ast;
mod ast_cache;
pub mod config;
mod context;
mod date;
mod engine;
#[allow(unused_assignments)]
mod error;
mod evaluator;
mod hooks;
mod html;
mod lexer;
mod library;
mod logic;
mod meta;
mod parser;
mod scanner;
pub mod store;
mod tokens;
mod value;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
