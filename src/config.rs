use std::time::Duration;

/// Origin handed to `postMessage` on the success page.
///
/// `Any` relays to whatever window opened the flow (`'*'`), which is
/// convenient during development but lets any page that manages to open the
/// popup read the code. Deployments that know the opener's origin should pin
/// it with `Origin`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetOrigin {
    #[default]
    Any,
    Origin(String),
}

impl TargetOrigin {
    pub(crate) fn as_message_target(&self) -> &str {
        match self {
            TargetOrigin::Any => "*",
            TargetOrigin::Origin(origin) => origin,
        }
    }
}

/// Deployment profile selected once at startup by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production { opener_origin: String },
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub target_origin: TargetOrigin,
    pub timeout: Option<Duration>,
}

impl RelayConfig {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: normalize_path(path.into()),
            target_origin: TargetOrigin::Any,
            timeout: None,
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        let config = Self::new("127.0.0.1", 3000, "/");
        match environment {
            Environment::Development => config,
            Environment::Production { opener_origin } => {
                config.with_target_origin(TargetOrigin::Origin(opener_origin))
            }
        }
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    pub fn with_target_origin(mut self, target_origin: TargetOrigin) -> Self {
        self.target_origin = target_origin;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn normalize_path(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}
