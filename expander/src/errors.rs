use std::fmt;

use diagnostics::{Diagnostic, DiagnosticBuilder, SourceSpan};
use parser::ReadError;

use crate::syntax::Site;
use crate::value::MacroValue;

/// Errors raised by the embedded evaluator
#[derive(Debug, Clone)]
pub enum EvalError {
    /// Identifier with no binding, global or builtin
    UndefinedVariable { name: String, location: Site },

    TypeError { message: String, location: Site },

    /// Raised by `throw` or a failed builtin
    RuntimeError { message: String, location: Site },

    RecursionLimitExceeded {
        function: String,
        depth: usize,
        max_depth: usize,
        location: Site,
    },

    UnsupportedOperation { operation: String, location: Site },

    /// Return from a function body
    Return { value: Box<MacroValue> },

    Break,

    Continue,
}

impl EvalError {
    pub fn location(&self) -> Site {
        match self {
            EvalError::UndefinedVariable { location, .. }
            | EvalError::TypeError { location, .. }
            | EvalError::RuntimeError { location, .. }
            | EvalError::RecursionLimitExceeded { location, .. }
            | EvalError::UnsupportedOperation { location, .. } => *location,
            EvalError::Return { .. } | EvalError::Break | EvalError::Continue => Site::unknown(),
        }
    }

    /// Whether this is a control flow signal (not a real error)
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            EvalError::Return { .. } | EvalError::Break | EvalError::Continue
        )
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            EvalError::UndefinedVariable { name, .. } => Some(format!(
                "declare '{}' before use, or import it `for syntax` if a macro needs it",
                name
            )),
            EvalError::RecursionLimitExceeded { function, .. } => Some(format!(
                "check '{}' for unbounded recursion, or raise `max_call_depth`",
                function
            )),
            _ => None,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UndefinedVariable { name, .. } => write!(f, "'{}' is not defined", name),
            EvalError::TypeError { message, .. } => write!(f, "type error: {}", message),
            EvalError::RuntimeError { message, .. } => write!(f, "{}", message),
            EvalError::RecursionLimitExceeded {
                function,
                depth,
                max_depth,
                ..
            } => write!(
                f,
                "'{}' exceeded the call depth limit: depth {} > max {}",
                function, depth, max_depth
            ),
            EvalError::UnsupportedOperation { operation, .. } => {
                write!(f, "unsupported operation: {}", operation)
            }
            EvalError::Return { .. } => write!(f, "return outside of a function"),
            EvalError::Break => write!(f, "break outside of a loop"),
            EvalError::Continue => write!(f, "continue outside of a loop"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Errors that abort an expansion run.
///
/// Locations are already resolved against the run's source map and always
/// point at source text, never at renamed identifiers.
#[derive(Debug, Clone)]
pub enum ExpandError {
    /// The module loader could not produce text for a specifier
    ModuleNotFound {
        specifier: String,
        reason: String,
        location: SourceSpan,
    },

    /// A `syntax`/`syntaxrec` initializer could not be evaluated at compile time
    SyntaxDeclaration {
        name: String,
        message: String,
        location: SourceSpan,
    },

    /// A transformer threw or returned something that is not syntax
    MacroExpansion {
        macro_name: String,
        message: String,
        location: SourceSpan,
    },

    Read {
        specifier: String,
        error: ReadError,
        location: SourceSpan,
    },

    /// Tokens that do not form a term
    Parse { message: String, location: SourceSpan },

    CircularImport {
        chain: Vec<String>,
        location: SourceSpan,
    },

    MissingExport {
        specifier: String,
        name: String,
        location: SourceSpan,
    },

    /// The configured `max_expansions` budget ran out
    ExpansionLimit { limit: usize, location: SourceSpan },

    /// Phase-0 evaluation of expanded code failed
    Evaluation {
        error: EvalError,
        location: SourceSpan,
    },
}

impl ExpandError {
    pub fn location(&self) -> &SourceSpan {
        match self {
            ExpandError::ModuleNotFound { location, .. }
            | ExpandError::SyntaxDeclaration { location, .. }
            | ExpandError::MacroExpansion { location, .. }
            | ExpandError::Read { location, .. }
            | ExpandError::Parse { location, .. }
            | ExpandError::CircularImport { location, .. }
            | ExpandError::MissingExport { location, .. }
            | ExpandError::ExpansionLimit { location, .. }
            | ExpandError::Evaluation { location, .. } => location,
        }
    }

    /// Error codes E0800-E0899 are reserved for expansion errors:
    /// - E0801: Module not found
    /// - E0802: Syntax declaration error
    /// - E0803: Macro expansion error
    /// - E0804: Read error
    /// - E0805: Parse error
    /// - E0806: Circular import
    /// - E0807: Missing export
    /// - E0808: Expansion limit reached
    /// - E0809: Evaluation error
    pub fn error_code(&self) -> &'static str {
        match self {
            ExpandError::ModuleNotFound { .. } => "E0801",
            ExpandError::SyntaxDeclaration { .. } => "E0802",
            ExpandError::MacroExpansion { .. } => "E0803",
            ExpandError::Read { .. } => "E0804",
            ExpandError::Parse { .. } => "E0805",
            ExpandError::CircularImport { .. } => "E0806",
            ExpandError::MissingExport { .. } => "E0807",
            ExpandError::ExpansionLimit { .. } => "E0808",
            ExpandError::Evaluation { .. } => "E0809",
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            ExpandError::ModuleNotFound { specifier, .. } => Some(format!(
                "check that '{}' is known to the module loader",
                specifier
            )),
            ExpandError::SyntaxDeclaration { .. } => Some(
                "compile-time code can only use other macros and `for syntax` imports".to_string(),
            ),
            ExpandError::CircularImport { chain, .. } => {
                Some(format!("break the import cycle: {}", chain.join(" -> ")))
            }
            ExpandError::ExpansionLimit { .. } => Some(
                "a macro may be re-introducing itself; raise `max_expansions` if not".to_string(),
            ),
            ExpandError::Evaluation { error, .. } => error.suggestion(),
            _ => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut builder = DiagnosticBuilder::error(self.to_string(), self.location().clone())
            .code(self.error_code());
        if let Some(help) = self.suggestion() {
            builder = builder.help(help);
        }
        builder.build()
    }
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandError::ModuleNotFound {
                specifier, reason, ..
            } => write!(f, "cannot find module '{}': {}", specifier, reason),
            ExpandError::SyntaxDeclaration { name, message, .. } => {
                write!(f, "syntax declaration '{}' failed: {}", name, message)
            }
            ExpandError::MacroExpansion {
                macro_name,
                message,
                ..
            } => write!(f, "expanding macro '{}' failed: {}", macro_name, message),
            ExpandError::Read {
                specifier, error, ..
            } => write!(f, "{} in '{}'", error, specifier),
            ExpandError::Parse { message, .. } => write!(f, "{}", message),
            ExpandError::CircularImport { chain, .. } => {
                write!(f, "circular import: {}", chain.join(" -> "))
            }
            ExpandError::MissingExport {
                specifier, name, ..
            } => write!(f, "module '{}' has no export named '{}'", specifier, name),
            ExpandError::ExpansionLimit { limit, .. } => {
                write!(f, "expansion limit of {} macro invocations reached", limit)
            }
            ExpandError::Evaluation { error, .. } => write!(f, "evaluation failed: {}", error),
        }
    }
}

impl std::error::Error for ExpandError {}
