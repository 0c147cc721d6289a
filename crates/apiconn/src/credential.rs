//! Login credentials
//!
//! A [`Credential`] is checked for contradictions before any network activity:
//! skipping login excludes every other field, and a password always needs a tag.

use crate::error::{ConnError, Result};
use crate::tag::Tag;
use ctrlink_common::config::LoginConfig;
use std::fmt;

/// 不透明的委托凭证令牌（macaroon 的序列化形式）
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedToken(String);

impl DelegatedToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DelegatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DelegatedToken(<{} bytes>)", self.0.len())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// 不发送登录请求
    Skip,
    /// 标签 + 密码；机器代理可附带供应 nonce
    Password {
        tag: Tag,
        password: String,
        nonce: Option<String>,
    },
    /// 委托凭证链，可以为空（首次握手会收到 discharge 要求）
    Delegated { chain: Vec<DelegatedToken> },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Skip => f.write_str("Skip"),
            Credential::Password { tag, nonce, .. } => f
                .debug_struct("Password")
                .field("tag", tag)
                .field("password", &"<redacted>")
                .field("nonce", &nonce.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::Delegated { chain } => f
                .debug_struct("Delegated")
                .field("chain_len", &chain.len())
                .finish(),
        }
    }
}

/// 登录信息的原始组成部分，来自配置或调用方
#[derive(Debug, Clone, Default)]
pub struct LoginParts {
    pub skip_login: bool,
    pub tag: Option<Tag>,
    pub password: Option<String>,
    pub nonce: Option<String>,
    pub tokens: Vec<DelegatedToken>,
}

impl Credential {
    pub fn password(tag: Tag, password: impl Into<String>) -> Self {
        Credential::Password {
            tag,
            password: password.into(),
            nonce: None,
        }
    }

    pub fn machine(tag: Tag, password: impl Into<String>, nonce: impl Into<String>) -> Self {
        Credential::Password {
            tag,
            password: password.into(),
            nonce: Some(nonce.into()),
        }
    }

    pub fn delegated(chain: Vec<DelegatedToken>) -> Self {
        Credential::Delegated { chain }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Credential::Skip)
    }

    /// 组合并校验登录信息
    pub fn from_parts(parts: LoginParts) -> Result<Self> {
        let has_password = parts.password.as_deref().is_some_and(|p| !p.is_empty());

        if parts.skip_login {
            if parts.tag.is_some() {
                return Err(ConnError::invalid("specifying tag and skip-login"));
            }
            if has_password {
                return Err(ConnError::invalid("specifying password and skip-login"));
            }
            if parts.nonce.is_some() {
                return Err(ConnError::invalid("specifying nonce and skip-login"));
            }
            if !parts.tokens.is_empty() {
                return Err(ConnError::invalid(
                    "specifying delegated credentials and skip-login",
                ));
            }
            return Ok(Credential::Skip);
        }

        match (parts.tag, parts.password) {
            (Some(tag), Some(password)) if !password.is_empty() => {
                if !parts.tokens.is_empty() {
                    return Err(ConnError::invalid(
                        "password and delegated credentials are mutually exclusive",
                    ));
                }
                Ok(Credential::Password {
                    tag,
                    password,
                    nonce: parts.nonce,
                })
            }
            (Some(tag), _) => Err(ConnError::invalid(format!(
                "tag {tag} specified without a password"
            ))),
            (None, Some(password)) if !password.is_empty() => {
                Err(ConnError::invalid("password specified without a tag"))
            }
            (None, _) => {
                if parts.nonce.is_some() {
                    return Err(ConnError::invalid("nonce specified without a password"));
                }
                Ok(Credential::Delegated {
                    chain: parts.tokens,
                })
            }
        }
    }

    /// 从配置文件段构建
    pub fn from_config(config: &LoginConfig) -> Result<Self> {
        let tag = config
            .tag
            .as_deref()
            .map(|t| {
                t.parse::<Tag>()
                    .map_err(|e| ConnError::invalid(format!("login tag: {e}")))
            })
            .transpose()?;

        Self::from_parts(LoginParts {
            skip_login: config.skip_login,
            tag,
            password: config.password.clone(),
            nonce: config.nonce.clone(),
            tokens: config.macaroons.iter().map(DelegatedToken::new).collect(),
        })
    }

    /// 校验直接构造的凭证
    pub fn validate(&self) -> Result<()> {
        match self {
            Credential::Password { tag, password, .. } if password.is_empty() => Err(
                ConnError::invalid(format!("tag {tag} specified without a password")),
            ),
            _ => Ok(()),
        }
    }

    /// 追加新获取的 discharge 令牌
    pub fn with_discharges(self, tokens: Vec<DelegatedToken>) -> Result<Self> {
        match self {
            Credential::Delegated { mut chain } => {
                chain.extend(tokens);
                Ok(Credential::Delegated { chain })
            }
            other => Err(ConnError::invalid(format!(
                "cannot add discharges to a {} credential",
                other.mode()
            ))),
        }
    }

    pub(crate) fn mode(&self) -> &'static str {
        match self {
            Credential::Skip => "skip",
            Credential::Password { .. } => "password",
            Credential::Delegated { .. } => "delegated",
        }
    }
}
