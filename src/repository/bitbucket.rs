// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    fetch_catalog, filter::Listing, pick, submit_selection, Provider, SelectResult,
};
use crate::{
    cache::{keys, QueryCache},
    error::Result,
    gateway::Gateway,
    model::{Identifier, Vcs},
};

const AVAILABLE_PATH: &str = "/api/v1/vcs-app/bitbucket/repositories/available";
const SELECT_PATH: &str = "/api/v1/vcs-app/bitbucket/repositories/select";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct BitbucketRepository {
    pub(crate) uuid: Identifier,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) full_name: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) is_private: bool,
    #[serde(default)]
    pub(crate) language: Option<String>,
    /// Slug of the workspace the repository lives in.
    #[serde(default)]
    pub(crate) workspace: Option<String>,
}

impl Listing for BitbucketRepository {
    fn id(&self) -> &Identifier {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn path(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    fn is_private(&self) -> bool {
        self.is_private
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct Workspace {
    #[serde(default)]
    pub(crate) uuid: Option<Identifier>,
    pub(crate) slug: String,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Catalog {
    repositories: Vec<BitbucketRepository>,
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

#[derive(Serialize)]
struct Selection<'a> {
    repository_ids: Vec<&'a Identifier>,
    repositories: &'a [BitbucketRepository],
}

#[derive(Clone)]
pub(crate) struct Bitbucket {
    gateway: Gateway,
    cache: QueryCache,
}

impl Bitbucket {
    pub(crate) fn new(gateway: Gateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }

    /// Workspaces the user can see, from the same cached catalogue as the
    /// repositories.
    pub(crate) async fn workspaces(&self, force_refresh: bool) -> Result<Vec<Workspace>> {
        Ok(self.catalog(force_refresh).await?.workspaces.clone())
    }

    async fn catalog(&self, force_refresh: bool) -> Result<std::sync::Arc<Catalog>> {
        fetch_catalog(
            &self.gateway,
            &self.cache,
            keys::BITBUCKET_AVAILABLE,
            AVAILABLE_PATH,
            force_refresh,
        )
        .await
    }
}

#[async_trait]
impl Provider for Bitbucket {
    type Repository = BitbucketRepository;

    fn vcs(&self) -> Vcs {
        Vcs::Bitbucket
    }

    async fn list_available(&self, force_refresh: bool) -> Result<Vec<BitbucketRepository>> {
        Ok(self.catalog(force_refresh).await?.repositories.clone())
    }

    async fn select(&self, ids: &[Identifier]) -> Result<SelectResult> {
        let repositories = pick(self.vcs(), &self.list_available(false).await?, ids)?;
        submit_selection(
            &self.gateway,
            &self.cache,
            keys::BITBUCKET_AVAILABLE,
            SELECT_PATH,
            &Selection {
                repository_ids: repositories.iter().map(|r| &r.uuid).collect(),
                repositories: &repositories,
            },
        )
        .await
    }
}
