//! Pages shown in the browser tab after the redirect
//!
//! The failure template may reference `{error}` and `{error_description}`;
//! both are HTML-escaped before interpolation. Either outcome can instead be
//! answered with a redirect to an external page.
//!
//! # How rendering works
//!
//! 1. The captured callback is classified (code, error, or empty).
//! 2. A configured redirect for that outcome wins and becomes a `302`.
//! 3. Otherwise the success page is returned as is, or the failure template
//!    is filled in a single pass: placeholder text inside a substituted
//!    value is never expanded again.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::webui::callback::{CallbackOutcome, CapturedCallback};

/// Marker text present in the default success page.
pub const SUCCESS_MARKER: &str = "Authentication complete";

/// Marker text present in the default failure page.
pub const FAILURE_MARKER: &str = "Authentication failed";

const DEFAULT_SUCCESS_HTML: &str = r#"<html style="font-family: sans-serif;">
  <head><title>Authentication Complete</title></head>
  <body style="text-align: center;">
    <header><h1>loopback-signin</h1></header>
    <main style="border: 1px solid lightgrey; margin: auto; width: 600px; padding-bottom: 15px;">
      <h2 style="color: limegreen;">Authentication complete</h2>
      <div>You can return to the application. Feel free to close this browser tab.</div>
    </main>
  </body>
</html>"#;

const DEFAULT_FAILURE_HTML: &str = r#"<html style="font-family: sans-serif;">
  <head><title>Authentication Failed</title></head>
  <body style="text-align: center;">
    <header><h1>loopback-signin</h1></header>
    <main style="border: 1px solid lightgrey; margin: auto; width: 600px; padding-bottom: 15px;">
      <h2 style="color: salmon;">Authentication failed</h2>
      <div><b>Error details:</b> error {error} error_description: {error_description}</div>
      <br>
      <div>You can return to the application. Feel free to close this browser tab.</div>
    </main>
  </body>
</html>"#;

// ---------------------------------------------------------------------------
// Page selection
// ---------------------------------------------------------------------------

/// The response the listener writes back to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackPage {
    /// `200 OK` with an HTML body
    Html(String),
    /// `302 Found` to an external page
    Redirect(Url),
}

/// Browser page templates and optional redirect targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserPages {
    /// HTML shown when the callback carries no error
    #[serde(default = "default_success_html")]
    pub success_html: String,

    /// HTML shown when the callback carries an error
    #[serde(default = "default_failure_html")]
    pub failure_html: String,

    /// Redirect the browser here on success instead of rendering HTML
    #[serde(default)]
    pub success_redirect: Option<Url>,

    /// Redirect the browser here on failure instead of rendering HTML
    #[serde(default)]
    pub failure_redirect: Option<Url>,
}

fn default_success_html() -> String {
    DEFAULT_SUCCESS_HTML.to_string()
}

fn default_failure_html() -> String {
    DEFAULT_FAILURE_HTML.to_string()
}

impl Default for BrowserPages {
    fn default() -> Self {
        Self {
            success_html: default_success_html(),
            failure_html: default_failure_html(),
            success_redirect: None,
            failure_redirect: None,
        }
    }
}

impl BrowserPages {
    /// Picks the page for a captured callback.
    ///
    /// # Examples
    ///
    /// ```
    /// use url::Url;
    /// use loopback_signin::webui::{BrowserPages, CallbackPage, CapturedCallback};
    ///
    /// let pages = BrowserPages::default();
    /// let uri = Url::parse("http://localhost:4000/?error=access_denied").unwrap();
    /// match pages.render(&CapturedCallback::new(uri)) {
    ///     CallbackPage::Html(body) => assert!(body.contains("access_denied")),
    ///     CallbackPage::Redirect(_) => unreachable!(),
    /// }
    /// ```
    pub fn render(&self, callback: &CapturedCallback) -> CallbackPage {
        match callback.outcome() {
            CallbackOutcome::Error { error, description } => match &self.failure_redirect {
                Some(url) => CallbackPage::Redirect(url.clone()),
                None => CallbackPage::Html(fill_template(
                    &self.failure_html,
                    &[
                        ("{error}", escape_html(&error).as_str()),
                        ("{error_description}", escape_html(&description).as_str()),
                    ],
                )),
            },
            CallbackOutcome::Code { .. } | CallbackOutcome::Empty => match &self.success_redirect
            {
                Some(url) => CallbackPage::Redirect(url.clone()),
                None => CallbackPage::Html(self.success_html.clone()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Template helpers
// ---------------------------------------------------------------------------

/// Replaces each placeholder in `template` with its value in one left to
/// right scan.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    'scan: while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];
        for (placeholder, value) in values {
            if let Some(tail) = rest.strip_prefix(placeholder) {
                out.push_str(value);
                rest = tail;
                continue 'scan;
            }
        }
        out.push('{');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
