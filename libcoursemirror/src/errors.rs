use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MirrorError {
    /// The login form was submitted but the site answered with its failure page.
    #[error("failed to authenticate as {username}")]
    AuthenticationFailed { username: String },
    /// A password field was found but no form to submit it with.
    #[error("no login form found on {0}")]
    LoginFormMissing(String),
    #[error("failed to download {url}. {message}")]
    ResourceFetch { url: String, message: String },
    #[error("server returned an error response. {url} => {status_code}")]
    ErrorStatusCode { status_code: String, url: String },
    /// Parameter is the link as it was found after resolution
    #[error("{0} is not a valid url")]
    LinkResolution(String),
    /// Parameter is the lecture name
    #[error("failed to find video for {0}")]
    MissingVideo(String),
    /// parameters are file path, additional error message
    #[error("{message} : {file_name}")]
    FileOperationError { file_name: String, message: String },
    #[error("error processing page content. {0}")]
    InvalidHtml(String),
    #[error("error connecting to internet. {0}")]
    NetworkError(String),
}

impl MirrorError {
    /// Errors that end the whole course instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MirrorError::AuthenticationFailed { .. } | MirrorError::LoginFormMissing(_)
        )
    }

    pub(crate) fn fetch(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        MirrorError::ResourceFetch {
            url: url.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn file_op(path: &std::path::Path, err: &std::io::Error) -> Self {
        MirrorError::FileOperationError {
            file_name: path.to_string_lossy().to_string(),
            message: format!("{} | {}", err, err.kind()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_login_problems_end_a_course() {
        assert!(MirrorError::AuthenticationFailed {
            username: "u".into()
        }
        .is_fatal());
        assert!(MirrorError::LoginFormMissing("http://site/c/auth".into()).is_fatal());
        assert!(!MirrorError::MissingVideo("Intro".into()).is_fatal());
        assert!(!MirrorError::ErrorStatusCode {
            status_code: "500 Internal Server Error".into(),
            url: "http://site/c/quiz".into(),
        }
        .is_fatal());
    }
}
