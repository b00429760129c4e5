//! `$${name}` placeholders in configured command vectors.
//!
//! Commands in `restpack.toml` are argument vectors written before any path
//! is known. Each argument may mention run-time values with `$${name}`:
//!
//! | name          | value                                         |
//! |---------------|-----------------------------------------------|
//! | `interpreter` | resolved scripting-language interpreter       |
//! | `driver`      | staged build-driver script                    |
//! | `dest`        | absolute BuildOutput destination              |
//! | `dir`         | directory whose scripts are byte-compiled     |
//! | `venv`        | isolated environment root                     |
//! | `python`      | interpreter inside the isolated environment   |
//! | `work`        | builder work directory                        |
//!
//! A single `$` is never special, so `sh -c` snippets keep `$1`, `$f` and
//! `${f}` as they are. `$$$` followed by `{` writes a literal `$${`.
//!
//! ```
//! use restpack_lib::placeholder::{Segment, parse};
//!
//! assert_eq!(
//!   parse("--dest_dir=$${dest}").unwrap(),
//!   vec![Segment::Literal("--dest_dir=".into()), Segment::Placeholder("dest".into())],
//! );
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

const OPEN: &str = "$$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  /// Byte offset of the `$$` that opened the placeholder.
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("unresolved placeholder: {0}")]
  Unresolved(String),
}

/// Supplies a value for each placeholder name.
pub trait Resolver {
  fn resolve(&self, name: &str) -> Result<&str, PlaceholderError>;
}

/// Placeholder values for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(BTreeMap<String, String>);

impl Vars {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
    self.set(name, value);
    self
  }

  pub fn set(&mut self, name: &str, value: impl Into<String>) {
    self.0.insert(name.to_owned(), value.into());
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }
}

impl Resolver for Vars {
  fn resolve(&self, name: &str) -> Result<&str, PlaceholderError> {
    self.get(name).ok_or_else(|| PlaceholderError::Unresolved(name.to_owned()))
  }
}

/// Split one argument into literal text and placeholder names.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;

  while let Some(at) = rest.find(OPEN) {
    literal.push_str(&rest[..at]);
    let start = input.len() - rest.len() + at;
    let after = &rest[at + OPEN.len()..];

    if let Some(tail) = after.strip_prefix("${") {
      literal.push_str("$${");
      rest = tail;
    } else if let Some(tail) = after.strip_prefix('$') {
      literal.push_str("$$$");
      rest = tail;
    } else if let Some(body) = after.strip_prefix('{') {
      let close = body.find('}').ok_or(PlaceholderError::Unclosed(start))?;
      let name = &body[..close];
      check_name(name)?;
      if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(&mut literal)));
      }
      segments.push(Segment::Placeholder(name.to_owned()));
      rest = &body[close + 1..];
    } else {
      literal.push_str(OPEN);
      rest = after;
    }
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}

fn check_name(name: &str) -> Result<(), PlaceholderError> {
  let ok = !name.is_empty() && name.bytes().all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'));
  if ok {
    Ok(())
  } else {
    Err(PlaceholderError::Malformed(format!("invalid name '{name}'")))
  }
}

pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  parse(input)?.into_iter().try_fold(String::new(), |mut out, segment| -> Result<String, PlaceholderError> {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Placeholder(name) => out.push_str(resolver.resolve(&name)?),
    }
    Ok(out)
  })
}

/// Resolve every element of a configured command.
pub fn substitute_args(args: &[String], resolver: &impl Resolver) -> Result<Vec<String>, PlaceholderError> {
  args.iter().map(|arg| substitute(arg, resolver)).collect()
}
