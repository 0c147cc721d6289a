//! Controller version numbers
//!
//! Accepted forms: `2.0`, `2.0.1`, `2.0.1.7` and tagged pre-releases such as
//! `2.1-beta1`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version number \"{0}\"")]
pub struct VersionError(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub tag: Option<String>,
    pub patch: u32,
    pub build: u32,
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError(s.to_string());
        let number = |part: &str| part.parse::<u32>().map_err(|_| invalid());

        let (major, rest) = s.split_once('.').ok_or_else(invalid)?;
        let major = number(major)?;

        // 2.1-beta1 形式：minor 后紧跟 tag 与 patch
        if let Some((minor, tagged)) = rest.split_once('-') {
            let minor = number(minor)?;
            let digits_at = tagged
                .find(|c: char| c.is_ascii_digit())
                .ok_or_else(invalid)?;
            let (tag, patch) = tagged.split_at(digits_at);
            if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_lowercase()) {
                return Err(invalid());
            }
            return Ok(Version {
                major,
                minor,
                tag: Some(tag.to_string()),
                patch: number(patch)?,
                build: 0,
            });
        }

        let mut parts = rest.split('.');
        let minor = number(parts.next().ok_or_else(invalid)?)?;
        let patch = parts.next().map(number).transpose()?.unwrap_or(0);
        let build = parts.next().map(number).transpose()?.unwrap_or(0);
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Version {
            major,
            minor,
            tag: None,
            patch,
            build,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}.{}-{}{}", self.major, self.minor, tag, self.patch)?,
            None => write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?,
        }
        if self.build > 0 {
            write!(f, ".{}", self.build)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        let v: Version = "2.0.1".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch, v.build), (2, 0, 1, 0));
        assert_eq!(v.to_string(), "2.0.1");

        let v: Version = "2.9".parse().unwrap();
        assert_eq!(v.to_string(), "2.9.0");
    }

    #[test]
    fn test_parse_tagged() {
        let v: Version = "2.1-beta1".parse().unwrap();
        assert_eq!(v.tag.as_deref(), Some("beta"));
        assert_eq!(v.patch, 1);
        assert_eq!(v.to_string(), "2.1-beta1");
    }

    #[test]
    fn test_parse_build() {
        let v: Version = "2.0.1.7".parse().unwrap();
        assert_eq!(v.build, 7);
        assert_eq!(v.to_string(), "2.0.1.7");
    }

    #[test]
    fn test_reject_garbage() {
        for bad in ["", "2", "two.0", "2.1-", "2.1-1", "2.0.1.2.3"] {
            assert!(bad.parse::<Version>().is_err(), "{bad} should not parse");
        }
    }
}
