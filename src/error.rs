// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{io, result, sync::Arc};

use reqwest::StatusCode;
use thiserror::Error;

use crate::model::Vcs;

pub(crate) type Result<T, E = Error> = result::Result<T, E>;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with HTTP {status}: {}", .body.escape_default())]
    Http { status: StatusCode, body: String },
    #[error("response did not have the expected shape at `{path}`: {message}")]
    Shape { path: String, message: String },
    #[error("no session credential is available")]
    MissingCredential,
    #[error("backend reports the session as not valid")]
    SessionRejected,
    #[error("none of the requested repositories are offered by {0}")]
    NothingToSelect(Vcs),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("JSON format error: {0}")]
    Json(serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[from] Storage),
    #[error("internal communication error: {0}")]
    Internal(#[from] Internal),
    #[error("{0}")]
    Shared(Arc<Error>),
    #[error("command execution failed")]
    Command,
}

impl Error {
    /// Looks through errors that were handed to more than one waiter.
    pub(crate) fn root(&self) -> &Self {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn status(&self) -> Option<StatusCode> {
        match self.root() {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Whether the failure means the credential itself is not acceptable, as
    /// opposed to the backend being unreachable.
    pub(crate) fn is_auth_failure(&self) -> bool {
        match self.root() {
            Self::MissingCredential | Self::SessionRejected | Self::Shape { .. } => true,
            Self::Http { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(value: Arc<Error>) -> Self {
        Self::Shared(value)
    }
}

impl<T> From<serde_path_to_error::Error<T>> for Error
where
    T: std::error::Error,
{
    fn from(value: serde_path_to_error::Error<T>) -> Self {
        let path = value.path().to_string();
        Self::Shape {
            path,
            message: value.into_inner().to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        // LINT: Deliberate fall-through that should catch future cases added to
        // the enum.
        #[allow(clippy::wildcard_enum_match_arm)]
        match value.classify() {
            serde_json::error::Category::Io => Self::Io(value.into()),
            _ => Self::Json(value),
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum Storage {
    #[cfg(feature = "keychain")]
    #[error("no platform data directory is available to hold the session")]
    NoProjectDirs,
    #[cfg(any(feature = "secret-service", feature = "keychain"))]
    #[error("stored session credential is not valid UTF-8")]
    NotUtf8,
    #[cfg(feature = "secret-service")]
    #[error("secret service error: {0}")]
    SecretService(#[from] oo7::Error),
    #[cfg(feature = "keychain")]
    #[error("keychain error: {0}")]
    Keychain(#[from] security_framework::base::Error),
}

#[derive(Error, Debug)]
pub(crate) enum Internal {
    #[error("cached value for query `{0}` has an unexpected type")]
    CacheTypeMismatch(String),
}
