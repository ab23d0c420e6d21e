use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

const MAX_NAME_LENGTH: usize = 255;

// Path components are lowercase alphanumeric runs joined by single
// separators; the first component may instead be a registry host with an
// optional port.
static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").unwrap());
static HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:\.[a-z0-9]+)*(?::[0-9]+)?$").unwrap());

/// A validated repository name.
///
/// This is the `<name>` in distribution API endpoints such as
/// `/v2/<name>/blobs/<digest>`. Names may contain `/` and are validated once
/// at construction; everything downstream can treat the inner string as
/// well-formed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepositoryName(String);

impl TryFrom<&str> for RepositoryName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidRepositoryName(s.to_string()));
        }
        for (i, component) in s.split('/').enumerate() {
            if COMPONENT_RE.is_match(component) {
                continue;
            }
            if i == 0 && HOST_RE.is_match(component) {
                continue;
            }
            return Err(Error::InvalidRepositoryName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl std::str::FromStr for RepositoryName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_from(s)
    }
}

impl AsRef<str> for RepositoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::single("app", true)]
    #[case::nested("lib/app", true)]
    #[case::deeply_nested("a/b/c/d", true)]
    #[case::separators("foo-bar/baz_quux/v1.0", true)]
    #[case::hosted("registry.example.com:5000/lib/app", true)]
    #[case::empty("", false)]
    #[case::uppercase("Lib/app", false)]
    #[case::leading_slash("/lib/app", false)]
    #[case::trailing_slash("lib/app/", false)]
    #[case::double_slash("lib//app", false)]
    #[case::leading_separator("-lib/app", false)]
    #[case::trailing_separator("lib-/app", false)]
    #[case::port_not_first("lib/example.com:5000", false)]
    fn validate(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(RepositoryName::try_from(input).is_ok(), ok, "{input}");
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a/".repeat(127) + "ab";
        assert!(long.len() > 255);
        assert!(RepositoryName::try_from(long.as_str()).is_err());
    }
}
