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

const AVAILABLE_PATH: &str = "/api/v1/vcs-app/gitlab/repositories/available";
const SELECT_PATH: &str = "/api/v1/vcs-app/gitlab/repositories/select";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct GitlabProject {
    pub(crate) id: Identifier,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) path_with_namespace: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    /// `public`, `internal` or `private`.
    #[serde(default)]
    pub(crate) visibility: Option<String>,
    #[serde(default)]
    pub(crate) web_url: Option<String>,
    #[serde(default)]
    pub(crate) default_branch: Option<String>,
    #[serde(default)]
    pub(crate) language: Option<String>,
}

impl Listing for GitlabProject {
    fn id(&self) -> &Identifier {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn path(&self) -> Option<&str> {
        self.path_with_namespace.as_deref()
    }

    fn is_private(&self) -> bool {
        self.visibility.as_deref().map_or(false, |v| v != "public")
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

#[derive(Clone, Debug, Deserialize)]
struct Catalog {
    projects: Vec<GitlabProject>,
}

#[derive(Serialize)]
struct Selection<'a> {
    project_ids: Vec<&'a Identifier>,
    projects: &'a [GitlabProject],
}

#[derive(Clone)]
pub(crate) struct Gitlab {
    gateway: Gateway,
    cache: QueryCache,
}

impl Gitlab {
    pub(crate) fn new(gateway: Gateway, cache: QueryCache) -> Self {
        Self { gateway, cache }
    }
}

#[async_trait]
impl Provider for Gitlab {
    type Repository = GitlabProject;

    fn vcs(&self) -> Vcs {
        Vcs::Gitlab
    }

    async fn list_available(&self, force_refresh: bool) -> Result<Vec<GitlabProject>> {
        let catalog = fetch_catalog::<Catalog>(
            &self.gateway,
            &self.cache,
            keys::GITLAB_AVAILABLE,
            AVAILABLE_PATH,
            force_refresh,
        )
        .await?;
        Ok(catalog.projects.clone())
    }

    async fn select(&self, ids: &[Identifier]) -> Result<SelectResult> {
        let projects = pick(self.vcs(), &self.list_available(false).await?, ids)?;
        submit_selection(
            &self.gateway,
            &self.cache,
            keys::GITLAB_AVAILABLE,
            SELECT_PATH,
            &Selection {
                project_ids: projects.iter().map(|p| &p.id).collect(),
                projects: &projects,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        error::Error,
        repository::{filter::RepositoryFilter, testing::gateway},
    };

    fn project(id: u64, path: &str, visibility: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": path.rsplit('/').next().unwrap(),
            "path_with_namespace": path,
            "visibility": visibility,
        })
    }

    #[tokio::test]
    async fn internal_projects_count_as_private() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AVAILABLE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [
                    project(1, "infra/Terraform", "internal"),
                    project(2, "infra/docs", "public"),
                ],
            })))
            .mount(&server)
            .await;

        let (gw, cache) = gateway(&server);
        let projects = Gitlab::new(gw, cache).list_available(false).await.unwrap();
        assert!(projects[0].is_private());
        assert!(!projects[1].is_private());

        let filter = RepositoryFilter {
            search: Some("INFRA/terra".to_owned()),
            ..RepositoryFilter::default()
        };
        assert_eq!(filter.apply(&projects), vec![&projects[0]]);
    }

    #[tokio::test]
    async fn selection_sends_ids_and_projects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AVAILABLE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [project(1, "g/a", "private"), project(2, "g/b", "public")],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SELECT_PATH))
            .and(body_json(json!({
                "project_ids": [2],
                "projects": [{
                    "id": 2,
                    "name": "b",
                    "path_with_namespace": "g/b",
                    "description": null,
                    "visibility": "public",
                    "web_url": null,
                    "default_branch": null,
                    "language": null,
                }],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"added": 1, "message": "1 project connected"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (gw, cache) = gateway(&server);
        let result = Gitlab::new(gw, cache)
            .select(&[Identifier::Number(2)])
            .await
            .unwrap();
        assert_eq!(
            result,
            SelectResult {
                added: Some(1),
                message: Some("1 project connected".to_owned()),
            }
        );
    }

    #[tokio::test]
    async fn rejected_selection_keeps_the_catalogue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AVAILABLE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [project(1, "g/a", "private")],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SELECT_PATH))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (gw, cache) = gateway(&server);
        let gitlab = Gitlab::new(gw, cache.clone());
        let err = gitlab.select(&[Identifier::Number(1)]).await.unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::FORBIDDEN));
        assert!(cache
            .peek::<Catalog>(keys::GITLAB_AVAILABLE)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unknown_projects_are_not_submitted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(AVAILABLE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [project(1, "g/a", "private")],
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(SELECT_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (gw, cache) = gateway(&server);
        let gitlab = Gitlab::new(gw, cache.clone());
        let err = gitlab.select(&[Identifier::Number(99)]).await.unwrap_err();
        assert!(matches!(err, Error::NothingToSelect(Vcs::Gitlab)));
        assert!(cache
            .peek::<Catalog>(keys::GITLAB_AVAILABLE)
            .await
            .unwrap()
            .is_some());
    }
}
