//! Application-wide error types.

use thiserror::Error;

use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("llm error: {0}")]
    Llm(#[from] ProviderError),

    #[error("a graph build is already running for project {0}")]
    BuildInProgress(String),

    #[error("no active project")]
    NoActiveProject,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn graph_error_display() {
        let e = AppError::Graph("cannot write graph.json".into());
        assert!(e.to_string().starts_with("graph error"));
    }

    #[test]
    fn build_in_progress_names_project() {
        let e = AppError::BuildInProgress("novel-1".into());
        assert!(e.to_string().contains("novel-1"));
    }

    #[test]
    fn provider_error_converts() {
        let e: AppError = ProviderError::Request("HTTP 500".into()).into();
        assert!(e.to_string().contains("HTTP 500"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
