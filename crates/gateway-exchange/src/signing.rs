//! 요청 파라미터 정규화 및 서명.
//!
//! 서명 입력은 항상 같은 방식으로 만듭니다: 파라미터 키를 사전순으로 정렬하고
//! (`signature` 키 제외) `key=value`를 `&`로 연결합니다.
//!
//! # 서명 방식
//!
//! - **HMAC-SHA256**: 공유 시크릿, 소문자 hex 인코딩
//! - **Ed25519**: 개인키 분리 서명, 표준 base64 인코딩
//!
//! 클라이언트는 생성 시점에 둘 중 하나로 고정됩니다.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signer as _, SigningKey};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;

use crate::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

/// 서명 필드 이름. 정규화 문자열에서 항상 제외됩니다.
pub const SIGNATURE_KEY: &str = "signature";

/// 서명 파라미터 맵.
pub type ParamMap = BTreeMap<String, Value>;

/// 파라미터 값을 서명 입력용 문자열로 변환합니다.
///
/// 문자열은 그대로, 숫자/불리언은 JSON 표기, `null`은 제외합니다.
fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 파라미터 집합을 정규화 문자열로 변환합니다.
///
/// ```
/// use gateway_exchange::signing::{canonicalize, ParamMap};
/// use serde_json::json;
///
/// let mut params = ParamMap::new();
/// params.insert("b".to_string(), json!("2"));
/// params.insert("a".to_string(), json!("1"));
/// assert_eq!(canonicalize(&params), "a=1&b=2");
/// ```
pub fn canonicalize(params: &ParamMap) -> String {
    params
        .iter()
        .filter(|(key, _)| key.as_str() != SIGNATURE_KEY)
        .filter_map(|(key, value)| param_text(value).map(|text| format!("{}={}", key, text)))
        .collect::<Vec<_>>()
        .join("&")
}

/// 타입이 있는 파라미터 구조체를 서명 파라미터 맵으로 평탄화합니다.
///
/// `None` 필드는 제외됩니다. 구조체가 아닌 값은 거부합니다.
pub fn to_param_map<T: Serialize>(params: &T) -> ExchangeResult<ParamMap> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        Value::Null => Ok(ParamMap::new()),
        other => Err(ExchangeError::InvalidParams(format!(
            "parameters must serialize to an object, got {}",
            other
        ))),
    }
}

/// 서명 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// HMAC-SHA256 (대칭키)
    Hmac,
    /// Ed25519 (비대칭키)
    Ed25519,
}

/// HMAC-SHA256 서명기.
pub struct HmacSigner {
    secret: SecretString,
}

impl HmacSigner {
    /// 공유 시크릿으로 생성합니다.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
        }
    }

    /// 페이로드를 서명하고 hex로 인코딩합니다.
    pub fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner")
            .field("secret", &"***REDACTED***")
            .finish()
    }
}

/// Ed25519 서명기.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// 서명 키로 생성합니다.
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// 32바이트 시드(hex)로 생성합니다.
    pub fn from_hex_seed(seed: &str) -> ExchangeResult<Self> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| ExchangeError::Signing(format!("invalid hex seed: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ExchangeError::Signing(format!("seed must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    /// PKCS#8 PEM 개인키로 생성합니다.
    pub fn from_pkcs8_pem(pem: &str) -> ExchangeResult<Self> {
        SigningKey::from_pkcs8_pem(pem)
            .map(Self::new)
            .map_err(|e| ExchangeError::Signing(format!("invalid PKCS#8 key: {}", e)))
    }

    /// PEM 또는 hex 시드 문자열을 자동 판별해 생성합니다.
    pub fn from_key_material(material: &str) -> ExchangeResult<Self> {
        if material.contains("-----BEGIN") {
            Self::from_pkcs8_pem(material)
        } else {
            Self::from_hex_seed(material)
        }
    }

    /// 검증용 공개키 (hex).
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// 페이로드를 서명하고 base64로 인코딩합니다.
    pub fn sign(&self, payload: &str) -> String {
        STANDARD.encode(self.key.sign(payload.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// 요청 서명기. 생성 후 방식은 바뀌지 않습니다.
#[derive(Debug)]
pub enum RequestSigner {
    /// HMAC-SHA256
    Hmac(HmacSigner),
    /// Ed25519
    Ed25519(Ed25519Signer),
}

impl RequestSigner {
    /// 서명 방식.
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            RequestSigner::Hmac(_) => SignatureScheme::Hmac,
            RequestSigner::Ed25519(_) => SignatureScheme::Ed25519,
        }
    }

    /// 정규화 문자열을 서명합니다.
    pub fn sign(&self, payload: &str) -> ExchangeResult<String> {
        match self {
            RequestSigner::Hmac(signer) => signer.sign(payload),
            RequestSigner::Ed25519(signer) => Ok(signer.sign(payload)),
        }
    }
}

/// API 자격증명 (식별 키 + 서명기).
///
/// # 보안
/// - `Debug` 구현은 API 키를 마스킹하고 시크릿을 출력하지 않습니다.
/// - 복제해도 서명기는 공유되며 키 material이 복사되지 않습니다.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    signer: Arc<RequestSigner>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.masked_key())
            .field("scheme", &self.signer.scheme())
            .finish()
    }
}

impl ApiCredentials {
    /// 새 자격증명 생성.
    pub fn new(api_key: impl Into<String>, signer: RequestSigner) -> Self {
        Self {
            api_key: api_key.into(),
            signer: Arc::new(signer),
        }
    }

    /// HMAC 자격증명 생성.
    pub fn hmac(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::new(api_key, RequestSigner::Hmac(HmacSigner::new(secret)))
    }

    /// Ed25519 자격증명 생성.
    pub fn ed25519(api_key: impl Into<String>, signer: Ed25519Signer) -> Self {
        Self::new(api_key, RequestSigner::Ed25519(signer))
    }

    /// 환경 변수에서 생성.
    ///
    /// `GATEWAY_API_KEY`가 필수이며, `GATEWAY_ED25519_KEY`가 있으면 Ed25519,
    /// 없으면 `GATEWAY_API_SECRET`으로 HMAC을 사용합니다.
    pub fn from_env() -> Option<ExchangeResult<Self>> {
        let api_key = std::env::var("GATEWAY_API_KEY").ok()?;

        if let Ok(material) = std::env::var("GATEWAY_ED25519_KEY") {
            return Some(
                Ed25519Signer::from_key_material(&material).map(|s| Self::ed25519(api_key, s)),
            );
        }

        let secret = std::env::var("GATEWAY_API_SECRET").ok()?;
        Some(Ok(Self::hmac(api_key, secret)))
    }

    /// API 키.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// 로그용 마스킹된 API 키 (앞뒤 4글자, 문자 단위).
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() > 8 {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            "***REDACTED***".to_string()
        }
    }

    /// 서명 방식.
    pub fn scheme(&self) -> SignatureScheme {
        self.signer.scheme()
    }

    /// 파라미터에 `apiKey`, `timestamp`, `signature`를 채워 넣습니다.
    ///
    /// 호출자가 넣어둔 `signature` 값은 덮어씁니다.
    pub fn sign_params(&self, params: &mut ParamMap, timestamp_ms: i64) -> ExchangeResult<()> {
        params.insert("apiKey".to_string(), Value::String(self.api_key.clone()));
        params.insert("timestamp".to_string(), Value::from(timestamp_ms));

        let payload = canonicalize(params);
        let signature = self.signer.sign(&payload)?;
        params.insert(SIGNATURE_KEY.to_string(), Value::String(signature));
        Ok(())
    }
}
