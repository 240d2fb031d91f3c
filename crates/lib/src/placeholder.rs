//! Placeholder parsing and substitution for phase commands.
//!
//! Phase commands in the project file reference directories that are only
//! known once a configuration pass starts (the isolated prefix, the unpacked
//! source tree, the staging directory). This module parses those references
//! and substitutes resolved values.
//!
//! # Placeholder Formats
//!
//! - `$${prefix}` - the isolated install prefix of the dependency
//! - `$${source}` - the unpacked source tree of the dependency
//! - `$${staging}` - the staging directory of a nested project
//! - `$${jobs}` - the configured build parallelism
//! - `$${name}` - the dependency or project name
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use depstrap_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("$${prefix}/lib:$HOME").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Prefix),
//!     Segment::Literal("/lib:$HOME".to_string()),
//! ]);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Placeholder {
  Prefix,
  Source,
  Staging,
  Jobs,
  Name,
}

impl Placeholder {
  pub fn as_str(&self) -> &'static str {
    match self {
      Placeholder::Prefix => "prefix",
      Placeholder::Source => "source",
      Placeholder::Staging => "staging",
      Placeholder::Jobs => "jobs",
      Placeholder::Name => "name",
    }
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder `{0}` is not available in this context")]
  Unavailable(&'static str),
}

/// Trait for resolving placeholder values during a configuration pass.
pub trait Resolver {
  fn resolve(&self, placeholder: Placeholder) -> Result<&str, PlaceholderError>;
}

/// Fixed set of placeholder values, built per phase context.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
  values: BTreeMap<Placeholder, String>,
}

impl Bindings {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
    self.values.insert(placeholder, value.into());
    self
  }
}

impl Resolver for Bindings {
  fn resolve(&self, placeholder: Placeholder) -> Result<&str, PlaceholderError> {
    self
      .values
      .get(&placeholder)
      .map(|s| s.as_str())
      .ok_or(PlaceholderError::Unavailable(placeholder.as_str()))
  }
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or names an unknown value.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();

            match chars.peek() {
              Some((_, '{')) => {
                // $$${ -> literal $${
                literal.push_str("$${");
                chars.next();
              }
              _ => literal.push_str("$$$"),
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;

            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  match content.trim() {
    "prefix" => Ok(Placeholder::Prefix),
    "source" => Ok(Placeholder::Source),
    "staging" => Ok(Placeholder::Staging),
    "jobs" => Ok(Placeholder::Jobs),
    "name" => Ok(Placeholder::Name),
    other => Err(PlaceholderError::Unknown(other.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;

  let mut result = String::with_capacity(input.len());
  for segment in &segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(resolver.resolve(*p)?),
    }
  }

  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bindings() -> Bindings {
    Bindings::new()
      .with(Placeholder::Prefix, "/work/prefix/jemalloc")
      .with(Placeholder::Jobs, "8")
      .with(Placeholder::Name, "jemalloc")
  }

  #[test]
  fn configure_command_with_prefix() {
    let cmd = "./configure --prefix=$${prefix} --disable-shared";
    assert_eq!(
      substitute(cmd, &bindings()).unwrap(),
      "./configure --prefix=/work/prefix/jemalloc --disable-shared"
    );
  }

  #[test]
  fn shell_variables_pass_through() {
    let cmd = "make -j$${jobs} CFLAGS=\"$CFLAGS -fPIC\" && echo $?";
    assert_eq!(
      substitute(cmd, &bindings()).unwrap(),
      "make -j8 CFLAGS=\"$CFLAGS -fPIC\" && echo $?"
    );
  }

  #[test]
  fn escaped_placeholder_is_literal() {
    assert_eq!(substitute("echo $$${prefix}", &bindings()).unwrap(), "echo $${prefix}");
  }

  #[test]
  fn double_dollar_without_brace_is_literal() {
    assert_eq!(substitute("echo $$ $$$x", &bindings()).unwrap(), "echo $$ $$$x");
  }

  #[test]
  fn unclosed_placeholder_errors() {
    assert_eq!(parse("cd $${prefix"), Err(PlaceholderError::Unclosed(3)));
  }

  #[test]
  fn unknown_placeholder_errors() {
    assert_eq!(
      parse("$${action:0}"),
      Err(PlaceholderError::Unknown("action:0".to_string()))
    );
  }

  #[test]
  fn unavailable_placeholder_errors() {
    assert_eq!(
      substitute("cd $${staging}", &bindings()),
      Err(PlaceholderError::Unavailable("staging"))
    );
  }

  #[test]
  fn multiple_placeholders_in_one_command() {
    let cmd = "cp -r $${name}.h $${prefix}/include/$${name}/";
    assert_eq!(
      substitute(cmd, &bindings()).unwrap(),
      "cp -r jemalloc.h /work/prefix/jemalloc/include/jemalloc/"
    );
  }
}
