// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use log::info;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{fetch_catalog, pick, submit_selection, Provider, RepositoryRecord, SelectResult};
use crate::{
    cache::{keys, QueryCache},
    error::{Error, Result},
    gateway::{self, Gateway, RequestOptions},
    model::{Identifier, Vcs},
    session::OrganizationContext,
};

const AVAILABLE_PATH: &str = "/api/v1/vcs-app/github/repositories/available";
const SELECT_PATH: &str = "/api/v1/repositories/add";

#[derive(Clone, Debug, Deserialize)]
struct Catalog {
    repositories: Vec<RepositoryRecord>,
}

#[derive(Serialize)]
struct Selection<'a> {
    repository_ids: &'a [Identifier],
}

#[derive(Deserialize)]
struct Installation {
    redirect_url: String,
}

#[derive(Clone)]
pub(crate) struct Github {
    gateway: Gateway,
    cache: QueryCache,
}

impl Github {
    pub(crate) fn new(gateway: Gateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }

    /// Starts the GitHub App installation for `org` and returns where the
    /// user has to go to finish it.
    pub(crate) async fn install(&self, org: &OrganizationContext) -> Result<Url> {
        let resp = self
            .gateway
            .request(
                Method::POST,
                &format!("/api/v1/vcs-app/{}/install", org.org_id),
                RequestOptions::default(),
            )
            .await?;
        let installation: Installation = gateway::read_json(resp).await?;
        let url = Url::parse(&installation.redirect_url).map_err(|e| Error::Shape {
            path: "redirect_url".to_owned(),
            message: e.to_string(),
        })?;
        info!("GitHub App installation for {} started", org.login);
        Ok(url)
    }
}

#[async_trait]
impl Provider for Github {
    type Repository = RepositoryRecord;

    fn vcs(&self) -> Vcs {
        Vcs::Github
    }

    async fn list_available(&self, force_refresh: bool) -> Result<Vec<RepositoryRecord>> {
        let catalog = fetch_catalog::<Catalog>(
            &self.gateway,
            &self.cache,
            keys::GITHUB_AVAILABLE,
            AVAILABLE_PATH,
            force_refresh,
        )
        .await?;
        Ok(catalog.repositories.clone())
    }

    async fn select(&self, ids: &[Identifier]) -> Result<SelectResult> {
        let available = self.list_available(false).await?;
        let repository_ids = pick(self.vcs(), &available, ids)?
            .into_iter()
            .map(|repo| repo.id)
            .collect::<Vec<_>>();
        submit_selection(
            &self.gateway,
            &self.cache,
            keys::GITHUB_AVAILABLE,
            SELECT_PATH,
            &Selection {
                repository_ids: &repository_ids,
            },
        )
        .await
    }
}
