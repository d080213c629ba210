use std::fmt::Display;

#[derive(Debug)]
pub struct SidecarServiceError {
    pub who: Option<String>,
    pub error: String,
}

impl SidecarServiceError {
    pub fn from_string(error: String) -> Self {
        SidecarServiceError { error, who: None }
    }

    pub fn from_error<E: Display>(prefix: &str) -> impl Fn(E) -> Self + '_ {
        move |e: E| SidecarServiceError::from_string(format!("{}: {}", prefix, e))
    }

    pub fn with_component(self, who: &str) -> Self {
        SidecarServiceError {
            error: self.error,
            who: Some(who.to_string()),
        }
    }
}

impl Display for SidecarServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.who {
            Some(who) => write!(f, "SidecarInjector [{}] error: {}", who, self.error),
            None => write!(f, "SidecarInjector error: {}", self.error),
        }
    }
}

impl std::error::Error for SidecarServiceError {}

impl From<&str> for SidecarServiceError {
    fn from(error: &str) -> Self {
        SidecarServiceError::from_string(error.to_string())
    }
}

impl From<String> for SidecarServiceError {
    fn from(error: String) -> Self {
        SidecarServiceError::from_string(error)
    }
}

impl From<serde_json::error::Error> for SidecarServiceError {
    fn from(error: serde_json::error::Error) -> Self {
        SidecarServiceError::from_string(error.to_string())
    }
}

impl From<serde_yaml::Error> for SidecarServiceError {
    fn from(error: serde_yaml::Error) -> Self {
        SidecarServiceError::from_string(error.to_string())
    }
}

impl From<std::io::Error> for SidecarServiceError {
    fn from(error: std::io::Error) -> Self {
        SidecarServiceError::from_string(error.to_string())
    }
}

impl From<kube::Error> for SidecarServiceError {
    fn from(error: kube::Error) -> Self {
        SidecarServiceError::from_string(error.to_string())
    }
}
