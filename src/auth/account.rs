//! Signed-in accounts and id_token claims
//!
//! Claims are read from the id_token payload without signature
//! verification. They only label the cache entry and greet the user; no
//! authorization decision is based on them.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SigninError};

/// An account known to the token cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `<oid>.<tid>` when the tenant is known, otherwise the object id
    pub home_account_id: String,
    /// `preferred_username`, falling back to `email` then `name`
    pub username: String,
    /// Tenant that issued the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// The id_token claims this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Decodes the payload segment of a compact JWT.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::TokenEndpoint`] when the token is not a
    /// three-segment JWT or the payload is not base64url JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use base64::Engine as _;
    /// use loopback_signin::auth::IdTokenClaims;
    ///
    /// let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
    ///     .encode(r#"{"oid":"123","tid":"t1","preferred_username":"ada@contoso.com"}"#);
    /// let jwt = format!("e30.{payload}.sig");
    /// let claims = IdTokenClaims::decode_unverified(&jwt).unwrap();
    /// assert_eq!(claims.oid.as_deref(), Some("123"));
    /// ```
    pub fn decode_unverified(id_token: &str) -> Result<Self> {
        let mut segments = id_token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(SigninError::TokenEndpoint("id_token is not a compact JWT".to_string()).into())
            }
        };

        // Some issuers pad the segments; accept both forms.
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| SigninError::TokenEndpoint(format!("id_token payload is not base64url: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| SigninError::TokenEndpoint(format!("id_token payload is not JSON: {e}")).into())
    }

    /// Builds the cache account for these claims.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::TokenEndpoint`] when neither `oid` nor `sub`
    /// is present.
    pub fn to_account(&self) -> Result<Account> {
        let object_id = self
            .oid
            .as_deref()
            .or(self.sub.as_deref())
            .ok_or_else(|| SigninError::TokenEndpoint("id_token has no oid or sub claim".to_string()))?;

        let home_account_id = match &self.tid {
            Some(tid) => format!("{object_id}.{tid}"),
            None => object_id.to_string(),
        };

        let username = self
            .preferred_username
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| object_id.to_string());

        Ok(Account {
            home_account_id,
            username,
            tenant_id: self.tid.clone(),
        })
    }
}
