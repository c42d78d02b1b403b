// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, sync::Arc};

use futures_util::lock::Mutex;
use log::debug;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};

use crate::{error::Result, storage};

/// Opaque bearer credential identifying a session to the backend.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub(crate) struct Credential(SecretString);

impl Credential {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }

    /// For backends that keep the raw bytes rather than JSON.
    #[cfg(any(feature = "secret-service", feature = "keychain"))]
    pub(crate) fn from_utf8(bytes: Vec<u8>) -> Result<Self> {
        String::from_utf8(bytes)
            .map(Self::new)
            .map_err(|_| crate::error::Storage::NotUtf8.into())
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Serialize for Credential {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

/// The single owner of the current session credential.
#[derive(Clone)]
pub(crate) struct TokenStore {
    storage: Arc<Mutex<Box<dyn storage::Storage<Credential>>>>,
}

impl TokenStore {
    pub(crate) fn new(storage: Box<dyn storage::Storage<Credential>>) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
        }
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        Self::new(Box::new(storage::Memory::new()))
    }

    pub(crate) async fn is_persistent(&self) -> bool {
        storage::IsPersistent::is_persistent(&*self.storage.lock().await)
    }

    pub(crate) async fn get(&self) -> Result<Option<Credential>> {
        self.storage.lock().await.get().await
    }

    pub(crate) async fn set(&self, credential: &Credential) -> Result<()> {
        debug!("Storing a new session credential");
        self.storage.lock().await.update(credential).await
    }

    pub(crate) async fn clear(&self) -> Result<()> {
        debug!("Clearing the session credential");
        self.storage.lock().await.clear().await
    }
}
