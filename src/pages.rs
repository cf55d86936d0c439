use serde_json::{Value, json};

use crate::TargetOrigin;

const DEFAULT_FAILURE_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Login failed</title></head>
  <body>
    <p>No auth code received. You may close this window and try again.</p>
  </body>
</html>
"#;

const DEFAULT_COMPLETED_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Login already completed</title></head>
  <body>
    <p>Login already completed. You may close this window.</p>
  </body>
</html>
"#;

const DEFAULT_NOT_FOUND_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Not found</title></head>
  <body>
    <p>Not found.</p>
  </body>
</html>
"#;

/// Browser-facing pages served by the relay.
///
/// The success page is the only one carrying script: it posts the result to
/// the opener window and asks the browser to close the popup. The other pages
/// are static and never message anyone.
#[derive(Debug, Clone)]
pub struct RelayPages {
    target_origin: TargetOrigin,
    failure_html: String,
    completed_html: String,
    not_found_html: String,
}

impl RelayPages {
    pub fn new(target_origin: TargetOrigin) -> Self {
        Self {
            target_origin,
            failure_html: DEFAULT_FAILURE_HTML.to_string(),
            completed_html: DEFAULT_COMPLETED_HTML.to_string(),
            not_found_html: DEFAULT_NOT_FOUND_HTML.to_string(),
        }
    }

    pub fn with_failure_html(mut self, html: impl Into<String>) -> Self {
        self.failure_html = html.into();
        self
    }

    pub fn with_completed_html(mut self, html: impl Into<String>) -> Self {
        self.completed_html = html.into();
        self
    }

    pub fn success(&self, code: &str, state: Option<&str>) -> String {
        let mut message = json!({ "type": "auth", "code": code });
        if let Some(state) = state {
            message["state"] = state.into();
        }
        let payload = js_value(&message);
        let target = js_value(&Value::String(
            self.target_origin.as_message_target().to_string(),
        ));

        format!(
            r#"<!doctype html>
<html>
  <head><meta charset="utf-8" /><title>Login complete</title></head>
  <body>
    <p>Login complete. You may close this window.</p>
    <script>
      window.opener.postMessage({payload}, {target});
      window.close();
    </script>
  </body>
</html>
"#
        )
    }

    pub fn failure(&self) -> &str {
        &self.failure_html
    }

    pub fn completed(&self) -> &str {
        &self.completed_html
    }

    pub fn not_found(&self) -> &str {
        &self.not_found_html
    }
}

impl Default for RelayPages {
    fn default() -> Self {
        Self::new(TargetOrigin::Any)
    }
}

// JSON is not quite a subset of what can sit inside a <script> element: a
// literal `<` in a string could terminate the element early. Escape it.
fn js_value(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::RelayPages;
    use crate::TargetOrigin;

    #[test]
    fn success_page_posts_to_any_origin_by_default() {
        let page = RelayPages::default().success("abc123", None);
        assert!(page.contains(r#"postMessage({"code":"abc123","type":"auth"}, "*")"#));
        assert!(page.contains("window.close()"));
    }

    #[test]
    fn success_page_pins_configured_origin() {
        let pages = RelayPages::new(TargetOrigin::Origin("https://app.example.com".to_string()));
        let page = pages.success("abc123", None);
        assert!(page.contains(r#", "https://app.example.com")"#));
        assert!(!page.contains(r#""*""#));
    }

    #[test]
    fn success_page_relays_state_when_present() {
        let page = RelayPages::default().success("abc123", Some("xyzzy"));
        assert!(page.contains(r#""state":"xyzzy""#));
    }

    #[test]
    fn script_breakout_in_code_is_escaped() {
        let page = RelayPages::default().success("</script><script>alert(1)", None);
        assert!(!page.contains("</script><script>"));
        assert!(page.contains(r"</script>"));
    }

    #[test]
    fn static_pages_never_message_the_opener() {
        let pages = RelayPages::default();
        for body in [pages.failure(), pages.completed(), pages.not_found()] {
            assert!(!body.contains("postMessage"));
        }
    }
}
