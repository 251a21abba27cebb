//! Captured browser callbacks
//!
//! The listener produces exactly one [`CapturedCallback`] per successful
//! invocation. The interceptor inspects it to pick the success or failure
//! page, and the token provider inspects it again to extract the code.

use std::collections::HashMap;

use url::Url;

/// The redirect request captured by the loopback listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedCallback {
    raw_uri: Url,
    query_parameters: HashMap<String, String>,
}

/// What a callback carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Authorization code issued; `state` is echoed when the request had one.
    Code {
        /// The authorization code
        code: String,
        /// The echoed `state` parameter
        state: Option<String>,
    },
    /// The authorization server reported an error.
    Error {
        /// The `error` code, e.g. `access_denied`
        error: String,
        /// The `error_description`, empty when absent
        description: String,
    },
    /// Neither a code nor an error was present.
    Empty,
}

impl CapturedCallback {
    /// Parses the query string of `raw_uri`.
    ///
    /// Values are percent-decoded (`+` decodes to a space). Duplicate keys
    /// keep the last occurrence.
    ///
    /// # Examples
    ///
    /// ```
    /// use url::Url;
    /// use loopback_signin::webui::CapturedCallback;
    ///
    /// let uri = Url::parse("http://localhost:4000/?code=ABC123&state=xyz").unwrap();
    /// let callback = CapturedCallback::new(uri);
    /// assert_eq!(callback.param("code"), Some("ABC123"));
    /// ```
    pub fn new(raw_uri: Url) -> Self {
        let query_parameters = raw_uri.query_pairs().into_owned().collect();
        Self {
            raw_uri,
            query_parameters,
        }
    }

    /// The full captured URI.
    pub fn raw_uri(&self) -> &Url {
        &self.raw_uri
    }

    /// All decoded query parameters.
    pub fn query_parameters(&self) -> &HashMap<String, String> {
        &self.query_parameters
    }

    /// A single decoded query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query_parameters.get(key).map(String::as_str)
    }

    /// Classifies the callback. An `error` parameter wins over a `code`.
    pub fn outcome(&self) -> CallbackOutcome {
        if let Some(error) = self.param("error").filter(|e| !e.is_empty()) {
            return CallbackOutcome::Error {
                error: error.to_string(),
                description: self.param("error_description").unwrap_or_default().to_string(),
            };
        }

        match self.param("code").filter(|c| !c.is_empty()) {
            Some(code) => CallbackOutcome::Code {
                code: code.to_string(),
                state: self.param("state").map(str::to_string),
            },
            None => CallbackOutcome::Empty,
        }
    }

    /// Returns `true` when the callback carries an `error` parameter.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome(), CallbackOutcome::Error { .. })
    }
}

impl From<Url> for CapturedCallback {
    fn from(uri: Url) -> Self {
        Self::new(uri)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
