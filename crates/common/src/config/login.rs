//! 登录凭证配置

use serde::{Deserialize, Serialize};

/// 登录配置
///
/// 三种登录方式：
/// - `skip_login = true`: 不执行登录握手
/// - `tag` + `password`: 密码登录（机器代理可额外提供 `nonce`）
/// - 其余情况: 委托凭证（macaroon）登录，`macaroons` 可以为空
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginConfig {
    /// 跳过登录
    #[serde(default)]
    pub skip_login: bool,

    /// 登录实体标签，例如 "user-admin" 或 "machine-0"
    pub tag: Option<String>,

    /// 登录密码
    pub password: Option<String>,

    /// 机器供应时使用的 nonce（仅机器代理）
    pub nonce: Option<String>,

    /// 委托凭证链（每项为一个不透明令牌）
    #[serde(default)]
    pub macaroons: Vec<String>,
}

impl LoginConfig {
    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.skip_login {
            if self.tag.is_some() {
                errors.push("login.tag cannot be combined with login.skip_login".to_string());
            }
            if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
                errors.push("login.password cannot be combined with login.skip_login".to_string());
            }
            if !self.macaroons.is_empty() {
                errors
                    .push("login.macaroons cannot be combined with login.skip_login".to_string());
            }
        }

        if self.password.is_some() && self.tag.is_none() {
            errors.push("login.password requires login.tag".to_string());
        }
    }
}
