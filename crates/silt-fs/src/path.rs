//! Platform-agnostic paths.
//!
//! A path is an ordered sequence of component strings; the empty sequence
//! is the root. Two renderings exist: the printable form joins components
//! with `/`, the database key form joins them with `'\u{FFFF}'`. The key
//! separator is a code point past every realistic component byte, so a
//! byte-ordered scan of `parent_key + SEPARATOR` yields exactly the
//! parent's descendants with no sibling collisions, which is why no
//! component may contain it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PathError};

/// Separator used to join components into database keys.
pub const SEPARATOR: char = '\u{FFFF}';

/// Separator used to print a path for humans.
pub const PRINT_SEPARATOR: char = '/';

/// Basename reported by the root, distinguishable from any valid name.
pub const ROOT_BASENAME: &str = "\u{FFFF}";

/// A filesystem path as a sequence of components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct P(Vec<String>);

impl P {
    /// The root path: zero components.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from components.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The components in order.
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Checks that no component is empty or contains the key separator.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        for component in &self.0 {
            if component.is_empty() || component.contains(SEPARATOR) {
                return Err(ErrorKind::InvalidPath);
            }
        }
        Ok(())
    }

    /// The parent path; the root is its own parent.
    pub fn parent(&self) -> P {
        if self.0.len() < 2 {
            return P::root();
        }
        P(self.0[..self.0.len() - 1].to_vec())
    }

    /// The last component, or the root basename sentinel.
    pub fn base(&self) -> &str {
        match self.0.last() {
            Some(component) => component,
            None => ROOT_BASENAME,
        }
    }

    /// Extends the path with one more component.
    pub fn join(&self, component: impl Into<String>) -> P {
        let mut components = self.0.clone();
        components.push(component.into());
        P(components)
    }

    /// Compares two paths by their joined components.
    pub fn equals(&self, other: &P) -> bool {
        self.0 == other.0
    }

    /// The database key form: a leading separator, components joined by
    /// the separator.
    pub fn key(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.0.iter().map(|c| c.len() + 3).sum::<usize>() + 3);
        out.push(SEPARATOR);
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(component);
        }
        out.into_bytes()
    }

    /// Inverse of [`P::key`]: splits on the separator, discarding the
    /// leading empty segment.
    pub fn from_key(key: &[u8]) -> Result<P, ErrorKind> {
        let text = std::str::from_utf8(key).map_err(|_| ErrorKind::InvalidPath)?;
        let mut segments = text.split(SEPARATOR);
        if segments.next() != Some("") {
            return Err(ErrorKind::InvalidPath);
        }
        let components: Vec<String> = segments.map(str::to_string).collect();
        if components.len() == 1 && components[0].is_empty() {
            return Ok(P::root());
        }
        let path = P(components);
        path.validate()?;
        Ok(path)
    }

    /// Wraps a cause into a [`PathError`] for this path.
    pub fn err(&self, op: &'static str, cause: ErrorKind) -> PathError {
        PathError::new(op, self.to_string(), cause)
    }
}

impl fmt::Display for P {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PRINT_SEPARATOR)?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PRINT_SEPARATOR)?;
            }
            write!(f, "{}", component)?;
        }
        Ok(())
    }
}

impl From<Vec<String>> for P {
    fn from(components: Vec<String>) -> Self {
        Self(components)
    }
}

impl From<&[&str]> for P {
    fn from(components: &[&str]) -> Self {
        Self(components.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for P {
    fn from(components: [&str; N]) -> Self {
        Self(components.iter().map(|c| c.to_string()).collect())
    }
}

impl FromIterator<String> for P {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
