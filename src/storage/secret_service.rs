// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use crate::{
    error::{self, Result},
    metadata,
    token::Credential,
};

use super::{IsPersistent, Storage};

/// Keeps the session in the desktop secret service, one item per API base
/// URL.
pub(crate) struct SecretService {
    keyring: oo7::Keyring,
    attributes: HashMap<String, String>,
}

impl SecretService {
    async fn item(&self) -> Result<Option<oo7::Item>> {
        Ok(self
            .keyring
            .search_items(
                self.attributes
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect(),
            )
            .await
            .map_err(error::Storage::from)?
            .into_iter()
            .next())
    }

    pub(crate) async fn new(api_url: &url::Url) -> Result<Self> {
        Ok(Self {
            keyring: oo7::Keyring::new().await.map_err(error::Storage::from)?,
            attributes: HashMap::from([
                (
                    format!("{}.kind", *metadata::CLIENT_TYPE_ID),
                    "session-credential".to_owned(),
                ),
                (
                    format!("{}.api-url", *metadata::CLIENT_TYPE_ID),
                    api_url.as_str().to_owned(),
                ),
            ]),
        })
    }
}

impl IsPersistent for SecretService {
    fn is_persistent(&self) -> bool {
        true
    }
}

#[async_trait]
impl Storage<Credential> for SecretService {
    async fn get(&mut self) -> Result<Option<Credential>> {
        match self.item().await? {
            Some(item) => {
                let secret = item.secret().await.map_err(error::Storage::from)?;
                Ok(Some(Credential::from_utf8(secret.to_vec())?))
            }
            None => Ok(None),
        }
    }

    /// Replaces any credential already stored for this API.
    async fn update(&mut self, credential: &Credential) -> Result<()> {
        self.keyring
            .create_item(
                &format!("{} session", *metadata::CLIENT_DISPLAY_NAME),
                self.attributes
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str()))
                    .collect(),
                credential.expose().as_bytes(),
                true,
            )
            .await
            .map_err(error::Storage::from)?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        if let Some(item) = self.item().await? {
            item.delete().await.map_err(error::Storage::from)?;
        }
        Ok(())
    }
}
