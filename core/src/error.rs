//! All error-related types for every compiler stage (§7.1). Each stage's
//! error type implements [`SourceError`] and is collected into a
//! [`WithSource`] wrapper alongside the original source text, so the whole
//! batch can be rendered with caret-highlighted context in one shot.

use crate::lexer::{LexError, Span};
use crate::util;
use failure::Fail;
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};

/// A trait for any error that originates in source code. `SourceError`s rely
/// on having source code present in order to display themselves.
pub trait SourceError: 'static + Send + Sync + Debug + Serialize {
    /// Format this error into a simple message. `spanned_src` is the slice of
    /// the source code that corresponds to this error's [`Span`].
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result;
}

impl SourceError for LexError {
    fn fmt_msg(&self, f: &mut Formatter<'_>, _spanned_src: &str) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Syntax errors raised by the recursive-descent parser (§7.1).
#[derive(Debug, Serialize)]
pub enum ParseError {
    UnexpectedToken { found: String, expected: String },
    MissingSemicolonOrEnd,
    MissingClosingDelimiter { delim: char },
    InvalidTypeSpecifier { found: String },
    NonConstantArrayBound,
    BadCaseLabel,
    LexError(String),
}

impl SourceError for ParseError {
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result {
        match self {
            Self::UnexpectedToken { found, expected } => {
                write!(f, "unexpected token `{}`, expected {}", found, expected)
            }
            Self::MissingSemicolonOrEnd => {
                write!(f, "expected `;` or `end` near `{}`", spanned_src)
            }
            Self::MissingClosingDelimiter { delim } => {
                write!(f, "missing closing `{}`", delim)
            }
            Self::InvalidTypeSpecifier { found } => {
                write!(f, "invalid type specifier `{}`", found)
            }
            Self::NonConstantArrayBound => {
                write!(f, "array bound `{}` does not fold to a constant", spanned_src)
            }
            Self::BadCaseLabel => {
                write!(f, "invalid case label `{}`", spanned_src)
            }
            Self::LexError(msg) => write!(f, "{}", msg),
        }
    }
}

/// Semantic-annotation errors (§7.1). Collected, not short-circuited: the
/// annotator keeps walking the tree after recording one, so a single run can
/// report every diagnostic it finds.
#[derive(Debug, Serialize)]
pub enum SemanticError {
    UndeclaredIdentifier { name: String },
    TypeMismatchOnAssign { expected: String, found: String },
    ProcPointerArityMismatch { name: String, expected: usize, found: usize },
    ProcPointerParamConventionMismatch { name: String, position: usize, expected: String, found: String },
    ProcPointerParamTypeMismatch { name: String, position: usize, expected: String, found: String },
    ProcPointerReturnTypeMismatch { name: String, expected: String, found: String },
    AddressOfNonProcedure { name: String },
    AssignmentToConstant { name: String },
    EnumValueOutOfRange { type_name: String, value: i64 },
}

impl SourceError for SemanticError {
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result {
        match self {
            Self::UndeclaredIdentifier { name } => {
                write!(f, "undeclared identifier `{}`", name)
            }
            Self::TypeMismatchOnAssign { expected, found } => write!(
                f,
                "cannot assign value of type `{}` to variable of type `{}`",
                found, expected
            ),
            Self::ProcPointerArityMismatch { name, expected, found } => write!(
                f,
                "proc pointer arity mismatch for '{}' (expected {}, got {})",
                name, expected, found
            ),
            Self::ProcPointerParamConventionMismatch { name, position, expected, found } => write!(
                f,
                "proc pointer param {} passing convention mismatch for '{}' (expected {}, got {})",
                position, name, expected, found
            ),
            Self::ProcPointerParamTypeMismatch { name, position, expected, found } => write!(
                f,
                "proc pointer param {} type mismatch for '{}' (expected {}, got {})",
                position, name, expected, found
            ),
            Self::ProcPointerReturnTypeMismatch { name, expected, found } => write!(
                f,
                "proc pointer return type mismatch for '{}' (expected {}, got {})",
                name, expected, found
            ),
            Self::AddressOfNonProcedure { name } => write!(
                f,
                "cannot take the address of `{}`: not a procedure or function",
                name
            ),
            Self::AssignmentToConstant { name } => {
                write!(f, "cannot assign to constant `{}` (`{}`)", name, spanned_src)
            }
            Self::EnumValueOutOfRange { type_name, value } => write!(
                f,
                "value {} is out of range for enum type `{}`",
                value, type_name
            ),
        }
    }
}

/// Errors raised while resolving and loading a `uses`-clause dependency
/// (§6.2, §7.1).
#[derive(Debug, Serialize)]
pub enum LoaderError {
    UnitFileNotFound { unit_name: String },
    RecursionTooDeep { unit_name: String, depth: u32 },
    FileReadShortRead { unit_name: String },
}

impl SourceError for LoaderError {
    fn fmt_msg(&self, f: &mut Formatter<'_>, _spanned_src: &str) -> fmt::Result {
        match self {
            Self::UnitFileNotFound { unit_name } => {
                write!(f, "could not find source file for unit `{}`", unit_name)
            }
            Self::RecursionTooDeep { unit_name, depth } => write!(
                f,
                "unit dependency chain too deep resolving `{}` (depth {})",
                unit_name, depth
            ),
            Self::FileReadShortRead { unit_name } => {
                write!(f, "short read while loading unit `{}`", unit_name)
            }
        }
    }
}

/// A wrapper around a [`SourceError`] that holds some extra data:
/// - The [`Span`] of the source code that caused the error.
/// - The offending chunk of source code itself.
///
/// This type on its own can be formatted, without any external data.
#[derive(Debug, Fail, Serialize)]
pub struct SourceErrorWrapper<E: SourceError> {
    error: E,
    span: Span,
    spanned_source: String,
}

impl<E: SourceError> SourceErrorWrapper<E> {
    pub fn new(error: E, span: Span, src: &str) -> Self {
        Self {
            error,
            span,
            spanned_source: util::span_slice(src, &span).to_string(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn inner(&self) -> &E {
        &self.error
    }
}

impl<E: SourceError> Display for SourceErrorWrapper<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "error at line {}, column {}: ", self.span.start_line, self.span.start_col)?;
        self.error.fmt_msg(f, &self.spanned_source)?;
        Ok(())
    }
}

/// A wrapper around a collection of errors, plus the source code they came
/// from, so each error can render associated source context.
#[derive(Debug, Fail, Serialize)]
pub struct WithSource<E: SourceError> {
    errors: Vec<SourceErrorWrapper<E>>,
    #[serde(skip)]
    source: String,
}

impl<E: SourceError> WithSource<E> {
    pub fn new(errors: impl IntoIterator<Item = SourceErrorWrapper<E>>, source: String) -> Self {
        Self {
            errors: errors.into_iter().collect(),
            source,
        }
    }

    pub fn errors(&self) -> &[SourceErrorWrapper<E>] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: SourceError> Display for WithSource<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
            if f.alternate() {
                util::fmt_src_highlights(f, &error.span, &self.source)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_wrapper_renders_line_and_column() {
        let span = Span {
            offset: 0,
            length: 3,
            start_line: 2,
            start_col: 5,
            end_line: 2,
            end_col: 8,
        };
        let err = SourceErrorWrapper::new(
            SemanticError::UndeclaredIdentifier { name: "foo".into() },
            span,
            "line one\n   foo",
        );
        let rendered = format!("{}", err);
        assert!(rendered.starts_with("error at line 2, column 5: "));
        assert!(rendered.contains("undeclared identifier `foo`"));
    }

    #[test]
    fn with_source_joins_multiple_errors_with_newline() {
        let span = Span::point(1, 1);
        let errors = vec![
            SourceErrorWrapper::new(
                SemanticError::AssignmentToConstant { name: "x".into() },
                span,
                "x := 1",
            ),
            SourceErrorWrapper::new(
                SemanticError::UndeclaredIdentifier { name: "y".into() },
                span,
                "x := 1",
            ),
        ];
        let with_source = WithSource::new(errors, "x := 1".to_string());
        let rendered = format!("{}", with_source);
        assert_eq!(rendered.lines().count(), 2);
    }
}
