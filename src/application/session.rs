//! Session Cookie 签名与校验
//!
//! Cookie 格式：
//! - `session`     = base64url(JSON SessionData)
//! - `session.sig` = base64url(HMAC-SHA256(key, "session=<value>"))
//!
//! 两把密钥轮换：用当前密钥签名，校验时当前密钥和上一把密钥都接受。

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::application::error::ClassifiedError;
use crate::config::SessionConfig;

type HmacSha256 = Hmac<Sha256>;

/// Session 校验错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session signature missing")]
    MissingSignature,

    #[error("Session signature invalid")]
    InvalidSignature,

    #[error("Session payload malformed")]
    Malformed,

    #[error("Session expired")]
    Expired,

    #[error("Session signing key rejected")]
    SigningKey,
}

impl From<SessionError> for ClassifiedError {
    fn from(e: SessionError) -> Self {
        ClassifiedError::not_authorized(e.to_string())
    }
}

/// Session 数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// 签发时间（毫秒时间戳）
    pub issued_at: i64,
}

impl SessionData {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            issued_at: Utc::now().timestamp_millis(),
        }
    }
}

/// 签名所用的密钥
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    Current,
    Previous,
}

/// 校验通过的 Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub data: SessionData,
    pub key: SigningKey,
}

impl VerifiedSession {
    /// 由旧密钥签名的 Session 需要用当前密钥重新签发
    pub fn needs_rotation(&self) -> bool {
        self.key == SigningKey::Previous
    }
}

/// Session 密钥集合
///
/// 进程内只构造一次，之后只读共享
pub struct SessionKeys {
    name: String,
    sig_name: String,
    current: Vec<u8>,
    previous: Vec<u8>,
    max_age_ms: i64,
    secure: bool,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("name", &self.name)
            .field("max_age_ms", &self.max_age_ms)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// `secure` 由部署环境决定，而不是每个请求单独判断
    pub fn new(config: &SessionConfig, secure: bool) -> Self {
        Self {
            name: config.name.clone(),
            sig_name: format!("{}.sig", config.name),
            current: config.current_key.as_bytes().to_vec(),
            previous: config.previous_key.as_bytes().to_vec(),
            max_age_ms: config.max_age_ms,
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    fn mac(&self, key: &[u8], value: &str) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::SigningKey)?;
        mac.update(self.name.as_bytes());
        mac.update(b"=");
        mac.update(value.as_bytes());
        Ok(mac)
    }

    fn sign(&self, value: &str) -> Result<String, SessionError> {
        let mac = self.mac(&self.current, value)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// 编码并签名，返回 (value, signature)
    pub fn encode(&self, data: &SessionData) -> Result<(String, String), SessionError> {
        let json = serde_json::to_vec(data).map_err(|_| SessionError::Malformed)?;
        let value = URL_SAFE_NO_PAD.encode(json);
        let sig = self.sign(&value)?;
        Ok((value, sig))
    }

    /// 校验 value + signature
    pub fn verify(&self, value: &str, sig: &str) -> Result<VerifiedSession, SessionError> {
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| SessionError::InvalidSignature)?;

        let key = if self.mac(&self.current, value)?.verify_slice(&sig_bytes).is_ok() {
            SigningKey::Current
        } else if self.mac(&self.previous, value)?.verify_slice(&sig_bytes).is_ok() {
            SigningKey::Previous
        } else {
            return Err(SessionError::InvalidSignature);
        };

        let raw = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| SessionError::Malformed)?;
        let data: SessionData = serde_json::from_slice(&raw).map_err(|_| SessionError::Malformed)?;

        let age = Utc::now().timestamp_millis() - data.issued_at;
        if age > self.max_age_ms {
            return Err(SessionError::Expired);
        }

        Ok(VerifiedSession { data, key })
    }

    /// 从请求头中读取并校验 Session
    ///
    /// 没有 Session Cookie 时返回 `Ok(None)`
    pub fn from_headers(&self, headers: &HeaderMap) -> Result<Option<VerifiedSession>, SessionError> {
        let jar = CookieJar::from_headers(headers);
        let Some(value) = jar.get(&self.name) else {
            return Ok(None);
        };
        let sig = jar
            .get(&self.sig_name)
            .ok_or(SessionError::MissingSignature)?;

        self.verify(value.value(), sig.value()).map(Some)
    }

    fn build_cookie(&self, name: String, value: String, max_age_ms: i64) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(time::Duration::milliseconds(max_age_ms))
            .build()
    }

    /// 签发 Session 的两个 Cookie
    pub fn issue(&self, data: &SessionData) -> Result<[Cookie<'static>; 2], SessionError> {
        let (value, sig) = self.encode(data)?;
        Ok([
            self.build_cookie(self.name.clone(), value, self.max_age_ms),
            self.build_cookie(self.sig_name.clone(), sig, self.max_age_ms),
        ])
    }

    /// 清除 Session 的两个 Cookie
    pub fn clear(&self) -> [Cookie<'static>; 2] {
        [
            self.build_cookie(self.name.clone(), String::new(), 0),
            self.build_cookie(self.sig_name.clone(), String::new(), 0),
        ]
    }
}
