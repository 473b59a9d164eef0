//! Hygienic macro expansion for a JavaScript-like language
//!
//! Programs declare transformers with `syntax`/`syntaxrec`; the expander
//! runs them at compile time on the tokens that follow each use and splices
//! their output back in. Identifiers are resolved by scope sets, so names a
//! transformer introduces never capture, or get captured by, names at the
//! use site.
//!
//! ```ignore
//! use expander::{Expander, MemoryLoader};
//!
//! let loader = MemoryLoader::new().with_module(
//!     "./m.js",
//!     "#lang \"sweet.js\"; export syntaxrec m = function (ctx) { return syntaxQuote`42`; }",
//! );
//! let result = Expander::new(Box::new(loader)).expand("import { m } from \"./m.js\"; m")?;
//! println!("{}", result.to_json()?);
//! ```

pub mod config;
mod enforester;
pub mod environment;
pub mod errors;
pub mod expander;
pub mod interpreter;
pub mod loader;
pub mod logging;
pub mod lower;
pub mod quasiquote;
pub mod registry;
pub mod scope;
pub mod syntax;
pub mod term;
pub mod value;

pub use config::{ConfigError, ExpanderConfig, NameRendering};
pub use environment::Environment;
pub use errors::{EvalError, ExpandError};
pub use expander::{expand, ExpansionOrigin, ExpansionResult, Expander, RunSummary, ENTRY_SPECIFIER};
pub use loader::{Dialect, FsLoader, MemoryLoader, ModuleSource};
pub use lower::HYGIENE_PLACEHOLDER;
pub use value::MacroValue;
