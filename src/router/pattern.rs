//! Route pattern compilation and path matching.
//!
//! A pattern such as `/users/:id/posts` is split on `/` into segments. A segment
//! starting with `:` is a named parameter that captures exactly one non-empty
//! path segment; every other segment must match byte-for-byte.
//!
//! Both patterns and paths keep their empty segments, so `/a/` (segments
//! `["", "a", ""]`) and `/a` (segments `["", "a"]`) are different routes and
//! `//x` only matches a pattern that also has an empty segment there.

use thiserror::Error;

use crate::context::Params;

/// Marks a segment as a named parameter.
pub const PARAM_SIGIL: char = ':';

/// Errors raised while compiling a pattern string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("route pattern `{pattern}` must start with `/`")]
    MissingLeadingSlash { pattern: String },

    #[error("route pattern `{pattern}` has a parameter with no name")]
    EmptyParameter { pattern: String },

    #[error("route pattern `{pattern}` declares parameter `{name}` more than once")]
    DuplicateParameter { pattern: String, name: String },
}

/// One `/`-delimited piece of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Must equal the path segment exactly (case-sensitive, possibly empty).
    Literal(String),
    /// Captures any non-empty path segment under this name.
    Param(String),
}

/// A compiled, immutable route pattern.
///
/// # Examples
///
/// ```
/// use switchyard::router::Pattern;
///
/// let pattern = Pattern::compile("/a/:x/:y").unwrap();
/// let params = pattern.matches("/a/1/2").unwrap();
/// assert_eq!(params.get("x"), Some("1"));
/// assert_eq!(params.get("y"), Some("2"));
///
/// assert!(pattern.matches("/a/1").is_none());
/// assert!(pattern.matches("/a/1/2/3").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compile a pattern string.
    ///
    /// # Errors
    ///
    /// - [`PatternError::MissingLeadingSlash`] — the pattern is not absolute.
    /// - [`PatternError::EmptyParameter`] — a segment is exactly `:`.
    /// - [`PatternError::DuplicateParameter`] — two segments share a parameter name.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash {
                pattern: pattern.to_owned(),
            });
        }

        let mut segments: Vec<Segment> = Vec::new();
        for raw in pattern.split('/') {
            let segment = match raw.strip_prefix(PARAM_SIGIL) {
                Some("") => {
                    return Err(PatternError::EmptyParameter {
                        pattern: pattern.to_owned(),
                    });
                }
                Some(name) => {
                    let taken = segments
                        .iter()
                        .any(|s| matches!(s, Segment::Param(existing) if existing == name));
                    if taken {
                        return Err(PatternError::DuplicateParameter {
                            pattern: pattern.to_owned(),
                            name: name.to_owned(),
                        });
                    }
                    Segment::Param(name.to_owned())
                }
                None => Segment::Literal(raw.to_owned()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_owned(),
            segments,
        })
    }

    /// The pattern string this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The compiled segments, leading empty segment included.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of the parameters, in the order they appear.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Test `path` against this pattern, returning the captured parameters on success.
    ///
    /// The segment counts must be equal; parameter values are captured verbatim.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let mut parts = path.split('/');
        let mut params = Params::new();

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_owned());
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// Returns `true` if both patterns accept exactly the same set of paths,
    /// i.e. they differ at most in parameter names.
    pub fn same_shape(&self, other: &Pattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
