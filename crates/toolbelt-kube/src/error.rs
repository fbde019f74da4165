use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("job not found: {namespace}/{name}")]
    JobNotFound { namespace: String, name: String },

    #[error("job {namespace}/{name} failed: {message}")]
    JobFailed {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("job {namespace}/{name} did not finish within {waited:?}")]
    WaitTimedOut {
        namespace: String,
        name: String,
        waited: Duration,
    },

    #[error("invalid job template: {0}")]
    InvalidTemplate(String),
}

impl KubeError {
    /// Map a 404 from the API server onto [`KubeError::JobNotFound`].
    pub(crate) fn from_get(err: kube::Error, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => KubeError::JobNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => KubeError::Api(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, KubeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "Whatever".into(),
            code,
        })
    }

    #[test]
    fn not_found_becomes_job_not_found() {
        let err = KubeError::from_get(api(404), "ci", "build");
        assert_eq!(err.to_string(), "job not found: ci/build");
    }

    #[test]
    fn other_codes_stay_api_errors() {
        let err = KubeError::from_get(api(403), "ci", "build");
        assert!(matches!(err, KubeError::Api(_)));
    }
}
