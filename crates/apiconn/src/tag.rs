//! Entity tags
//!
//! Tags name entities on the controller as `kind-id`, e.g. `user-admin`,
//! `machine-0`, `unit-mysql-0` or `model-<uuid>`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("\"{0}\" is not a valid tag")]
    Invalid(String),

    #[error("\"{tag}\" is not a valid {expected} tag")]
    WrongKind { tag: String, expected: TagKind },

    #[error("\"{0}\" does not contain a valid UUID")]
    InvalidUuid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    User,
    Machine,
    Unit,
    Application,
    Model,
    Controller,
}

impl TagKind {
    const ALL: [TagKind; 6] = [
        TagKind::User,
        TagKind::Machine,
        TagKind::Unit,
        TagKind::Application,
        TagKind::Model,
        TagKind::Controller,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            TagKind::User => "user",
            TagKind::Machine => "machine",
            TagKind::Unit => "unit",
            TagKind::Application => "application",
            TagKind::Model => "model",
            TagKind::Controller => "controller",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 通用实体标签
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    kind: TagKind,
    id: String,
}

impl Tag {
    pub fn new(kind: TagKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for kind in TagKind::ALL {
            if let Some(id) = s
                .strip_prefix(kind.prefix())
                .and_then(|rest| rest.strip_prefix('-'))
            {
                if id.is_empty() {
                    break;
                }
                if matches!(kind, TagKind::Model | TagKind::Controller)
                    && Uuid::parse_str(id).is_err()
                {
                    return Err(TagError::InvalidUuid(s.to_string()));
                }
                return Ok(Tag::new(kind, id));
            }
        }
        Err(TagError::Invalid(s.to_string()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

macro_rules! uuid_tag {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = TagError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let tag: Tag = s.parse()?;
                if tag.kind() != $kind {
                    return Err(TagError::WrongKind {
                        tag: s.to_string(),
                        expected: $kind,
                    });
                }
                Uuid::parse_str(tag.id())
                    .map(Self)
                    .map_err(|_| TagError::InvalidUuid(s.to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $kind, self.0)
            }
        }

        impl From<$name> for Tag {
            fn from(tag: $name) -> Tag {
                Tag::new($kind, tag.0.to_string())
            }
        }
    };
}

uuid_tag!(ModelTag, TagKind::Model);
uuid_tag!(ControllerTag, TagKind::Controller);
