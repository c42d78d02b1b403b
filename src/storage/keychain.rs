// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use security_framework::os::macos::keychain::{SecKeychain, SecPreferencesDomain};

use crate::{
    error::{self, Result},
    metadata,
    token::Credential,
};

use super::{IsPersistent, Storage};

// errSecItemNotFound
const ITEM_NOT_FOUND: i32 = -25300_i32;

pub(crate) struct Keychain {
    delegate: SecKeychain,
    service: String,
    account: String,
}

impl Keychain {
    pub(crate) fn new(api_url: &url::Url) -> Result<Self> {
        Ok(Self {
            delegate: SecKeychain::default_for_domain(SecPreferencesDomain::User)
                .map_err(Into::<error::Storage>::into)?,
            service: metadata::PROJECT_DIRS
                .as_ref()
                .map(|dirs| dirs.project_path().as_os_str())
                .ok_or(error::Storage::NoProjectDirs)?
                .to_string_lossy()
                .to_string(),
            account: api_url.to_string(),
        })
    }
}

impl IsPersistent for Keychain {
    fn is_persistent(&self) -> bool {
        true
    }
}

/// One generic password per API base URL, under the platform project path.
#[async_trait]
impl Storage<Credential> for Keychain {
    async fn get(&mut self) -> Result<Option<Credential>> {
        match self
            .delegate
            .find_generic_password(&self.service, &self.account)
        {
            Ok((password, _)) => Ok(Some(Credential::from_utf8(password.to_vec())?)),
            Err(err) if err.code() == ITEM_NOT_FOUND => Ok(None),
            Err(err) => Err(Into::<error::Storage>::into(err).into()),
        }
    }

    async fn update(&mut self, credential: &Credential) -> Result<()> {
        self.delegate
            .set_generic_password(&self.service, &self.account, credential.expose().as_bytes())
            .map_err(Into::<error::Storage>::into)?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        match self
            .delegate
            .find_generic_password(&self.service, &self.account)
        {
            Ok((_, item)) => item.delete(),
            Err(err) if err.code() == ITEM_NOT_FOUND => {}
            Err(err) => return Err(Into::<error::Storage>::into(err).into()),
        };
        Ok(())
    }
}
