use serde::Serialize;
use url::form_urlencoded;

use crate::RelayPages;

/// One inbound redirect from the identity provider, reduced to the parts the
/// relay cares about. Fully consumed while producing a single [`RelayResult`]
/// and one HTTP response.
#[derive(Debug, Clone)]
pub struct RedirectRequest {
    pub path: String,
    /// Raw query string, still percent-encoded.
    pub query: String,
}

impl RedirectRequest {
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: query.into(),
        }
    }
}

/// Outcome handed back to the application that opened the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayResult {
    Success {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
    },
    /// The provider answered with an explicit `error` parameter.
    Failure { error: String },
    /// The redirect violates success/failure exclusivity: both `code` and
    /// `error`, or neither.
    Malformed { reason: String },
}

impl RelayResult {
    /// Classify a raw query string. The code is treated as an opaque value:
    /// standard URL decoding only, no shape validation.
    pub fn from_query(query: &str) -> Self {
        let mut code = None;
        let mut error = None;
        let mut error_description = None;
        let mut state = None;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" if code.is_none() => code = Some(value.into_owned()),
                "error" if error.is_none() => error = Some(value.into_owned()),
                "error_description" if error_description.is_none() => {
                    error_description = Some(value.into_owned());
                }
                "state" if state.is_none() => state = Some(value.into_owned()),
                _ => {}
            }
        }

        match (code, error) {
            (Some(_), Some(_)) => RelayResult::Malformed {
                reason: "redirect carried both code and error".to_string(),
            },
            (Some(code), None) => RelayResult::Success { code, state },
            (None, Some(error)) => RelayResult::Failure {
                error: match error_description {
                    Some(description) => format!("{error}: {description}"),
                    None => error,
                },
            },
            (None, None) => RelayResult::Malformed {
                reason: "redirect carried neither code nor error".to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RelayResult::Success { .. })
    }
}

/// Status and body of the page sent back to the browser, kept free of
/// transport types so the core stays testable without a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: String,
}

/// Pure transform of one inbound request into the result for the waiting
/// application and the page for the browser.
///
/// Requests off the callback path yield no result: the exchange is not yet
/// complete and the relay keeps listening. Whether a produced result is
/// authoritative is decided by the caller, which owns the one-shot delivery
/// flag shared across in-flight requests.
pub fn handle_redirect(
    request: &RedirectRequest,
    callback_path: &str,
    pages: &RelayPages,
) -> (Option<RelayResult>, RelayResponse) {
    if request.path != callback_path {
        return (
            None,
            RelayResponse {
                status: 404,
                body: pages.not_found().to_string(),
            },
        );
    }

    let result = RelayResult::from_query(&request.query);
    let body = match &result {
        RelayResult::Success { code, state } => pages.success(code, state.as_deref()),
        RelayResult::Failure { .. } | RelayResult::Malformed { .. } => {
            pages.failure().to_string()
        }
    };

    (Some(result), RelayResponse { status: 200, body })
}
