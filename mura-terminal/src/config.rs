//! Terminal configuration from the environment

use mura_core::{ApiToken, MuraError, MuraResult};
use mura_services::FeatureKind;

/// Features mounted at start when `MURA_FEATURES` is unset
pub const DEFAULT_FEATURES: &str = "markets,balance";

/// Dashboard user to sign in as
#[derive(Clone)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Token used when the signed-in user has none stored (redacted in Debug output)
    pub api_token: Option<ApiToken>,
    /// Features mounted at start, in order
    pub features: Vec<FeatureKind>,
    pub login: Option<Login>,
}

impl TerminalConfig {
    /// Reads `DERIV_API_TOKEN`, `MURA_FEATURES`, `MURA_EMAIL` and `MURA_PASSWORD`
    pub fn from_env() -> MuraResult<Self> {
        let api_token = std::env::var("DERIV_API_TOKEN")
            .ok()
            .map(ApiToken::new)
            .filter(|token| !token.is_empty());
        let features = parse_features(
            &std::env::var("MURA_FEATURES").unwrap_or_else(|_| DEFAULT_FEATURES.to_string()),
        )?;
        let login = parse_login(
            std::env::var("MURA_EMAIL").ok(),
            std::env::var("MURA_PASSWORD").ok(),
        )?;

        Ok(Self {
            api_token,
            features,
            login,
        })
    }
}

/// Both or neither of email and password
pub fn parse_login(email: Option<String>, password: Option<String>) -> MuraResult<Option<Login>> {
    let email = email.filter(|email| !email.trim().is_empty());
    let password = password.filter(|password| !password.is_empty());
    match (email, password) {
        (Some(email), Some(password)) => Ok(Some(Login {
            email: email.trim().to_string(),
            password,
        })),
        (None, None) => Ok(None),
        _ => Err(MuraError::config(
            "MURA_EMAIL and MURA_PASSWORD must be set together",
        )),
    }
}

/// Comma-separated feature list; duplicates are ignored
pub fn parse_features(raw: &str) -> MuraResult<Vec<FeatureKind>> {
    let mut features = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let kind: FeatureKind = name
            .parse()
            .map_err(|e| MuraError::config(format!("MURA_FEATURES: {}", e)))?;
        if !features.contains(&kind) {
            features.push(kind);
        }
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_features() {
        assert_eq!(
            parse_features(DEFAULT_FEATURES).unwrap(),
            vec![FeatureKind::Markets, FeatureKind::Balance]
        );
        assert_eq!(
            parse_features(" orders, history,,orders ").unwrap(),
            vec![FeatureKind::Portfolio, FeatureKind::History]
        );
        assert!(parse_features("").unwrap().is_empty());
        assert!(matches!(
            parse_features("markets,profile"),
            Err(MuraError::Config(_))
        ));
    }

    #[test]
    fn test_parse_login() {
        let login = parse_login(Some(" trader@example.com ".into()), Some("hunter22".into()))
            .unwrap()
            .unwrap();
        assert_eq!(login.email, "trader@example.com");
        assert!(!format!("{:?}", login).contains("hunter22"));

        assert!(parse_login(None, None).unwrap().is_none());
        assert!(parse_login(Some("".into()), None).unwrap().is_none());
        assert!(matches!(
            parse_login(Some("trader@example.com".into()), None),
            Err(MuraError::Config(_))
        ));
    }
}
