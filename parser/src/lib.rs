//! Reading and output syntax for the sweeten expander
//!
//! - [`reader`]: module text to [`TokenTree`]s
//! - [`ast`]: the `type`-tagged tree handed back after expansion

pub mod ast;
pub mod reader;
pub mod token;

pub use reader::{read, ReadError};
pub use token::{Delimiter, Span, TokenKind, TokenTree};
