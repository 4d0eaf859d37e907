use thiserror::Error;

/// Who is at fault for a failed conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent nothing usable.
    Input,
    /// Anything that went wrong after a payload was accepted.
    Conversion,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No PDF data received")]
    EmptyPayload,

    #[error("invalid multipart request: {0}")]
    Multipart(String),

    #[error("temp file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("{0:#}")]
    Engine(anyhow::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("conversion task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyPayload | Error::Multipart(_) => ErrorKind::Input,
            Error::TempFile(_) | Error::Engine(_) | Error::Rejected(_) | Error::Task(_) => {
                ErrorKind::Conversion
            }
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::EmptyPayload.kind(), ErrorKind::Input);
        assert_eq!(Error::Multipart("bad boundary".into()).kind(), ErrorKind::Input);
        assert_eq!(Error::Rejected("not a PDF".into()).kind(), ErrorKind::Conversion);
        let io = std::io::Error::other("disk full");
        assert_eq!(Error::TempFile(io).kind(), ErrorKind::Conversion);
    }

    #[test]
    fn engine_error_keeps_context_chain() {
        let err = Error::Engine(anyhow::anyhow!("exit 1").context("docling runner"));
        assert_eq!(err.to_string(), "docling runner: exit 1");
    }
}
