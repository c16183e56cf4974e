//! Farmware environment: which FarmBot OS we run under and how to reach it.
//!
//! Resolved once per process into an [`Env`] snapshot. The transport to use
//! is derived from it as a [`TransportConfig`] instead of being re-checked at
//! every call site.

use crate::commands::normalize_farmware_name;
use crate::error::{Error, Result};
use base64::Engine;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const FBOS_VERSION_VAR: &str = "FARMBOT_OS_VERSION";
pub const FARMWARE_URL_VAR: &str = "FARMWARE_URL";
pub const FARMWARE_TOKEN_VAR: &str = "FARMWARE_TOKEN";
pub const REQUEST_PIPE_VAR: &str = "FARMWARE_API_V2_REQUEST_PIPE";
pub const RESPONSE_PIPE_VAR: &str = "FARMWARE_API_V2_RESPONSE_PIPE";
pub const API_TOKEN_VAR: &str = "API_TOKEN";
pub const IMAGES_DIR_VAR: &str = "IMAGES_DIR";

/// First FarmBot OS major version that speaks the framed-pipe API.
const PIPE_API_MAJOR: u32 = 8;

/// A FarmBot OS version such as `7.0.1` or `V7.0.11-rc1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FarmbotOsVersion {
    parts: Vec<u32>,
}

impl FarmbotOsVersion {
    /// Leading major version number (0 when unknown).
    #[must_use]
    pub fn major(&self) -> u32 {
        self.parts.first().copied().unwrap_or(0)
    }

    /// Whether this version is at least `required`, compared component-wise
    /// with missing components treated as zero.
    #[must_use]
    pub fn at_least(&self, required: &[u32]) -> bool {
        let len = self.parts.len().max(required.len());
        for i in 0..len {
            let have = self.parts.get(i).copied().unwrap_or(0);
            let want = required.get(i).copied().unwrap_or(0);
            if have != want {
                return have > want;
            }
        }
        true
    }
}

impl FromStr for FarmbotOsVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let release = s
            .trim()
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .split('-')
            .next()
            .unwrap_or_default();
        let parts = release
            .split('.')
            .map_while(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect();
        Ok(Self { parts })
    }
}

impl fmt::Display for FarmbotOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.parts.iter().map(ToString::to_string).collect();
        if parts.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", parts.join("."))
        }
    }
}

/// How commands leave this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// No controller reachable: commands are printed, not sent.
    Offline,
    /// HTTP device API of FarmBot OS before v8.
    Legacy { base_url: String, token: String },
    /// Framed messages over the v8 request/response pipes.
    Piped { request: PathBuf, response: PathBuf },
}

impl TransportConfig {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Legacy { .. } => "legacy",
            Self::Piped { .. } => "piped",
        }
    }
}

/// Snapshot of the Farmware process environment.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub fbos_version: FarmbotOsVersion,
    pub farmware_url: Option<String>,
    pub farmware_token: Option<String>,
    pub request_pipe: Option<PathBuf>,
    pub response_pipe: Option<PathBuf>,
    pub api_token: Option<String>,
    pub images_dir: Option<PathBuf>,
    vars: BTreeMap<String, String>,
}

impl Env {
    /// Read the snapshot from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build the snapshot from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| vars.get(key).cloned();
        let fbos_version = get(FBOS_VERSION_VAR)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Self {
            fbos_version,
            farmware_url: get(FARMWARE_URL_VAR),
            farmware_token: get(FARMWARE_TOKEN_VAR),
            request_pipe: get(REQUEST_PIPE_VAR).map(PathBuf::from),
            response_pipe: get(RESPONSE_PIPE_VAR).map(PathBuf::from),
            api_token: get(API_TOKEN_VAR),
            images_dir: get(IMAGES_DIR_VAR).map(PathBuf::from),
            vars,
        }
    }

    /// Whether the controller speaks the framed-pipe API.
    #[must_use]
    pub fn use_v2(&self) -> bool {
        self.fbos_version.major() >= PIPE_API_MAJOR
    }

    /// Base URL and token of the HTTP device API, when configured.
    #[must_use]
    pub fn device_api(&self) -> Option<(String, String)> {
        match (&self.farmware_url, &self.farmware_token) {
            (Some(url), Some(token)) => Some((url.clone(), token.clone())),
            _ => None,
        }
    }

    /// Whether any device API is reachable from this process.
    #[must_use]
    pub fn farmware_api_available(&self) -> bool {
        !matches!(self.transport(), Ok(TransportConfig::Offline))
    }

    /// Pick the transport for this process.
    ///
    /// A v8 controller with only one of the two pipes configured is a
    /// configuration error; no endpoints at all means offline echo.
    pub fn transport(&self) -> Result<TransportConfig> {
        if self.use_v2() {
            match (&self.request_pipe, &self.response_pipe) {
                (Some(request), Some(response)) => {
                    return Ok(TransportConfig::Piped {
                        request: request.clone(),
                        response: response.clone(),
                    });
                }
                (Some(_), None) => {
                    return Err(Error::Config(format!("{RESPONSE_PIPE_VAR} is not set")));
                }
                (None, Some(_)) => {
                    return Err(Error::Config(format!("{REQUEST_PIPE_VAR} is not set")));
                }
                (None, None) => {}
            }
        }
        Ok(self
            .device_api()
            .map_or(TransportConfig::Offline, |(base_url, token)| {
                TransportConfig::Legacy { base_url, token }
            }))
    }

    /// Read a Farmware input value, e.g. `take_photo_input_1`.
    pub fn get_config_value<T>(&self, farmware_name: &str, config_name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let key = format!("{}_{config_name}", normalize_farmware_name(farmware_name));
        let raw = self
            .vars
            .get(&key)
            .ok_or_else(|| Error::Config(format!("{key} is not set")))?;
        raw.parse()
            .map_err(|e| Error::Config(format!("invalid value `{raw}` for {key}: {e}")))
    }
}

/// Bearer token and API base URL for the Web App, read from a JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAppCredentials {
    pub token: String,
    pub base_url: String,
}

impl WebAppCredentials {
    /// Decode the token's payload and derive the API URL from its `iss` claim.
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| Error::Config("API token is not a JWT".into()))?;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::Config(format!("API token payload: {e}")))?;
        let claims: serde_json::Value =
            serde_json::from_slice(&decoded).map_err(Error::Deserialize)?;
        let issuer = claims
            .get("iss")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Config("API token has no `iss` claim".into()))?;
        let scheme = if issuer.contains(":443") { "https" } else { "http" };
        Ok(Self {
            token: token.to_string(),
            base_url: format!("{scheme}:{issuer}/api/"),
        })
    }

    /// Credentials from the `API_TOKEN` of an environment snapshot.
    pub fn from_env(env: &Env) -> Result<Self> {
        let token = env
            .api_token
            .as_deref()
            .ok_or_else(|| Error::Config(format!("{API_TOKEN_VAR} is not set")))?;
        Self::from_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(s: &str) -> FarmbotOsVersion {
        s.parse().expect("infallible")
    }

    #[test]
    fn test_version_at_least() {
        let current = version("7.0.1");
        let ok: &[&[u32]] = &[
            &[7, 0, 1],
            &[7, 0, 0],
            &[6, 0, 2],
            &[6, 3, 1],
            &[6, 0, 0],
            &[7, 0],
            &[6, 2],
            &[6, 1],
            &[6, 0],
            &[7],
            &[6],
        ];
        for required in ok {
            assert!(current.at_least(required), "7.0.1 >= {required:?}");
        }
        let less: &[&[u32]] = &[
            &[7, 0, 2],
            &[8, 0, 0],
            &[8, 0, 2],
            &[7, 1],
            &[7, 2],
            &[8, 0],
            &[8, 2],
            &[8],
        ];
        for required in less {
            assert!(!current.at_least(required), "7.0.1 < {required:?}");
        }
    }

    #[test]
    fn test_version_prefix_and_suffix() {
        let v = version("V7.0.11-rc1");
        assert!(v.at_least(&[7, 0, 11]));
        assert_eq!(v.major(), 7);
        assert_eq!(v.to_string(), "7.0.11");
        assert_eq!(version("").major(), 0);
        assert_eq!(version("garbage").to_string(), "0");
    }

    #[test]
    fn test_offline_when_nothing_configured() {
        let env = Env::from_vars([(FBOS_VERSION_VAR, "7.0.0")]);
        assert_eq!(env.transport().expect("transport"), TransportConfig::Offline);
        assert!(!env.farmware_api_available());
    }

    #[test]
    fn test_legacy_transport() {
        let env = Env::from_vars([
            (FARMWARE_URL_VAR, "http://localhost:27347/"),
            (FARMWARE_TOKEN_VAR, "secret"),
        ]);
        assert_eq!(
            env.transport().expect("transport"),
            TransportConfig::Legacy {
                base_url: "http://localhost:27347/".into(),
                token: "secret".into(),
            }
        );
    }

    #[test]
    fn test_pipes_require_v8() {
        let pipes = [
            (REQUEST_PIPE_VAR, "/tmp/req"),
            (RESPONSE_PIPE_VAR, "/tmp/resp"),
        ];
        let old = Env::from_vars(pipes.iter().copied().chain([(FBOS_VERSION_VAR, "7.1.0")]));
        assert_eq!(old.transport().expect("transport"), TransportConfig::Offline);

        let new = Env::from_vars(pipes.iter().copied().chain([(FBOS_VERSION_VAR, "8.0.0")]));
        assert!(new.use_v2());
        assert_eq!(
            new.transport().expect("transport"),
            TransportConfig::Piped {
                request: "/tmp/req".into(),
                response: "/tmp/resp".into(),
            }
        );
    }

    #[test]
    fn test_half_configured_pipes_is_an_error() {
        let env = Env::from_vars([(FBOS_VERSION_VAR, "8.0.0"), (REQUEST_PIPE_VAR, "/tmp/req")]);
        assert!(matches!(env.transport(), Err(Error::Config(_))));
    }

    #[test]
    fn test_get_config_value() {
        let env = Env::from_vars([
            ("farmware_name_int_input", "10"),
            ("farmware_name_str_input", "ten"),
        ]);
        let int: i64 = env
            .get_config_value("Farmware Name", "int_input")
            .expect("int");
        assert_eq!(int, 10);
        let text: String = env
            .get_config_value("farmware-name", "str_input")
            .expect("str");
        assert_eq!(text, "ten");
        assert!(env.get_config_value::<i64>("farmware_name", "str_input").is_err());
        assert!(env.get_config_value::<String>("farmware_name", "missing").is_err());
    }

    #[test]
    fn test_web_app_credentials_from_token() {
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"iss":"//my.farm.bot:443","bot":"device_1"}"#);
        let token = format!("header.{payload}.signature");
        let creds = WebAppCredentials::from_token(&token).expect("decode");
        assert_eq!(creds.base_url, "https://my.farm.bot:443/api/");
        assert_eq!(creds.token, token);

        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"iss":"//localhost:3000"}"#);
        let creds = WebAppCredentials::from_token(&format!("h.{payload}==.s")).expect("decode");
        assert_eq!(creds.base_url, "http://localhost:3000/api/");
    }

    #[test]
    fn test_web_app_credentials_rejects_garbage() {
        assert!(WebAppCredentials::from_token("not-a-jwt").is_err());
        assert!(WebAppCredentials::from_env(&Env::default()).is_err());
    }
}
