// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Session validity as seen by the dashboard.
//!
//! The [`Resolver`] moves through `Uninitialized → Validating → {Valid,
//! Invalid}`. It does nothing until [`Resolver::enable`] is called, so a flow
//! that is still persisting a freshly delivered credential can hold it back.
//! Verdicts are cached under [`keys::SESSION`] and never retried; an invalid
//! session needs a new login, not another request.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::ValueEnum;
use log::{debug, info, warn};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;

use crate::{
    cache::{keys, QueryCache, QueryOptions},
    error::{Error, Result},
    gateway::{self, Gateway, RequestOptions},
    model::{Identifier, Vcs},
    navigate::{self, Navigator},
    token::Credential,
};

pub(crate) const VALIDATE_PATH: &str = "/api/v1/login/validate-session";
const LOGOUT_PATH: &str = "/api/v1/login/logout";
const ORG_ID_PATH: &str = "/api/v1/login/user/org-id";

pub(crate) const SESSION_QUERY: QueryOptions =
    QueryOptions::new(Duration::from_secs(2 * 60), Duration::from_secs(5 * 60));
const ORG_QUERY: QueryOptions =
    QueryOptions::new(Duration::from_secs(5 * 60), Duration::from_secs(10 * 60));

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct SessionVerdict {
    pub(crate) valid: bool,
    #[serde(default)]
    pub(crate) user_id: Option<Identifier>,
    #[serde(default)]
    pub(crate) login: Option<String>,
    #[serde(default)]
    pub(crate) email: Option<String>,
    #[serde(default)]
    pub(crate) vcs: Option<String>,
}

impl SessionVerdict {
    pub(crate) fn vcs(&self) -> Option<Vcs> {
        self.vcs.as_deref().and_then(Vcs::parse)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct OrganizationContext {
    #[serde(rename = "orgId")]
    pub(crate) org_id: Identifier,
    pub(crate) login: String,
    #[serde(default)]
    pub(crate) vcs_type: Option<String>,
}

/// How the backend learns who we are.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Delivery {
    /// A stored bearer credential is required; without one nothing is sent.
    Token,
    /// The backend's session cookie is relied on; validation is always sent.
    Cookie,
}

/// Why a session was judged invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Rejection {
    MissingCredential,
    /// The backend answered but said the session is not valid.
    NotValid,
    Status(StatusCode),
    Malformed { path: String },
    Unreachable(String),
}

impl From<&Error> for Rejection {
    fn from(value: &Error) -> Self {
        match value.root() {
            Error::MissingCredential => Self::MissingCredential,
            Error::SessionRejected => Self::NotValid,
            Error::Shape { path, .. } => Self::Malformed { path: path.clone() },
            other => match other.status() {
                Some(status) => Self::Status(status),
                None => Self::Unreachable(other.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum State {
    Uninitialized,
    Validating,
    Valid(Arc<SessionVerdict>),
    Invalid(Rejection),
}

/// Lets exactly one of several concurrent observers of an invalid session
/// perform the redirect.
#[derive(Debug, Default)]
pub(crate) struct RedirectGuard {
    in_progress: AtomicBool,
}

impl RedirectGuard {
    pub(crate) fn try_acquire(&self) -> bool {
        !self.in_progress.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn reset(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

pub(crate) struct Resolver {
    gateway: Gateway,
    cache: QueryCache,
    delivery: Delivery,
    navigator: Arc<dyn Navigator>,
    enabled: watch::Sender<bool>,
    state: watch::Sender<State>,
    redirect: RedirectGuard,
}

impl Resolver {
    pub(crate) fn new(
        gateway: Gateway,
        cache: QueryCache,
        delivery: Delivery,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            gateway,
            cache,
            delivery,
            navigator,
            enabled: watch::Sender::new(false),
            state: watch::Sender::new(State::Uninitialized),
            redirect: RedirectGuard::default(),
        }
    }

    pub(crate) fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub(crate) fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn navigator(&self) -> &dyn Navigator {
        self.navigator.as_ref()
    }

    pub(crate) fn enable(&self) {
        if !self.enabled.send_replace(true) {
            debug!("Session validation enabled");
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub(crate) fn state(&self) -> State {
        self.state.borrow().clone()
    }

    async fn require_credential(&self) -> Result<()> {
        if self.delivery == Delivery::Token && self.gateway.tokens().get().await?.is_none() {
            return Err(Error::MissingCredential);
        }
        Ok(())
    }

    async fn validate_session(&self) -> Result<Arc<SessionVerdict>> {
        self.require_credential().await?;
        let gateway = self.gateway.clone();
        self.cache
            .fetch(keys::SESSION, SESSION_QUERY, move || async move {
                gateway
                    .get_json::<SessionVerdict>(VALIDATE_PATH, RequestOptions::default())
                    .await
            })
            .await
    }

    /// Runs validation if the resolver is enabled and publishes the
    /// resulting state. While disabled this sends nothing and reports
    /// [`State::Uninitialized`].
    pub(crate) async fn resolve(&self) -> State {
        if !self.is_enabled() {
            debug!("Session validation is not enabled yet");
            return self.state();
        }

        let _ = self.state.send_replace(State::Validating);
        let next = match self.validate_session().await {
            Ok(verdict) if verdict.valid => {
                self.redirect.reset();
                State::Valid(verdict)
            }
            Ok(_) => {
                info!("Backend reports the session as no longer valid");
                State::Invalid(Rejection::NotValid)
            }
            Err(e) if e.is_auth_failure() => {
                info!("Session was rejected: {}", e);
                State::Invalid(Rejection::from(&e))
            }
            Err(e) => {
                warn!("Session validation failed: {}", e);
                State::Invalid(Rejection::from(&e))
            }
        };
        let _ = self.state.send_replace(next.clone());
        next
    }

    /// Checks a credential that has not been stored yet.
    pub(crate) async fn verify_credential(
        &self,
        credential: Credential,
    ) -> Result<SessionVerdict> {
        let verdict: SessionVerdict = self
            .gateway
            .get_json(
                VALIDATE_PATH,
                RequestOptions::default().with_bearer(credential),
            )
            .await?;
        if verdict.valid {
            Ok(verdict)
        } else {
            Err(Error::SessionRejected)
        }
    }

    /// Drops local session state and sends the user to the login route. The
    /// state is dropped on every call; only the first caller after an invalid
    /// verdict navigates and the rest return `false`.
    pub(crate) async fn redirect_to_login(&self) -> bool {
        if let Err(e) = self.gateway.tokens().clear().await {
            warn!("Could not clear the stored session credential: {}", e);
        }
        self.forget_session().await;
        if !self.redirect.try_acquire() {
            debug!("Redirect to login already in progress");
            return false;
        }
        self.navigator.navigate(navigate::LOGIN_ROUTE);
        true
    }

    /// Nothing cached belongs to anyone but the departing session.
    async fn forget_session(&self) {
        self.cache.clear().await;
    }

    pub(crate) async fn organization(&self) -> Result<Arc<OrganizationContext>> {
        self.require_credential().await?;
        let gateway = self.gateway.clone();
        self.cache
            .fetch(keys::ORG_ID, ORG_QUERY, move || async move {
                gateway
                    .get_json::<OrganizationContext>(ORG_ID_PATH, RequestOptions::default())
                    .await
            })
            .await
    }

    /// Ends the session on both sides. A failing backend call is reported
    /// but does not keep the local session alive.
    pub(crate) async fn logout(&self) -> Result<()> {
        match self
            .gateway
            .request(Method::POST, LOGOUT_PATH, RequestOptions::default())
            .await
        {
            Ok(resp) => {
                if let Err(e) = gateway::ensure_success(resp).await {
                    warn!("Backend did not accept the logout: {}", e);
                }
            }
            Err(e) => warn!("Could not reach the backend to log out: {}", e),
        }

        let cleared = self.gateway.tokens().clear().await;
        let _ = self
            .state
            .send_replace(State::Invalid(Rejection::MissingCredential));
        self.redirect.reset();
        let _ = self.redirect_to_login().await;
        cleared
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{testing::resolver, *};

    fn validate() -> wiremock::MockBuilder {
        Mock::given(method("GET")).and(path(VALIDATE_PATH))
    }

    #[tokio::test]
    async fn disabled_resolver_never_calls_the_backend() {
        let server = MockServer::start().await;
        validate()
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
            .expect(0)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        for _ in 0..3 {
            assert_eq!(resolver.resolve().await, State::Uninitialized);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn valid_verdict_carries_user_fields() {
        let server = MockServer::start().await;
        validate()
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "valid": true,
                "user_id": 12,
                "login": "octocat",
                "email": "octo@example.com",
                "vcs": "github",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Token);
        resolver.gateway().tokens().set(&Credential::new("t0k")).await.unwrap();
        resolver.enable();

        match resolver.resolve().await {
            State::Valid(verdict) => {
                assert_eq!(verdict.login.as_deref(), Some("octocat"));
                assert_eq!(verdict.user_id, Some(Identifier::Number(12)));
                assert_eq!(verdict.vcs(), Some(Vcs::Github));
            }
            other => panic!("unexpected state {other:?}"),
        }
        // Still fresh: served from cache.
        assert!(matches!(resolver.resolve().await, State::Valid(_)));
    }

    #[tokio::test]
    async fn missing_credential_short_circuits() {
        let server = MockServer::start().await;
        validate()
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
            .expect(0)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Token);
        resolver.enable();
        assert_eq!(
            resolver.resolve().await,
            State::Invalid(Rejection::MissingCredential)
        );
    }

    #[tokio::test]
    async fn unauthorized_is_invalid_and_not_retried() {
        let server = MockServer::start().await;
        validate()
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        resolver.enable();
        assert_eq!(
            resolver.resolve().await,
            State::Invalid(Rejection::Status(StatusCode::UNAUTHORIZED))
        );
    }

    #[tokio::test]
    async fn malformed_and_negative_verdicts_are_invalid() {
        let server = MockServer::start().await;
        validate()
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": "yes"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        validate()
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": false})))
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        resolver.enable();
        assert_eq!(
            resolver.resolve().await,
            State::Invalid(Rejection::Malformed {
                path: "valid".to_owned()
            })
        );
        assert_eq!(resolver.resolve().await, State::Invalid(Rejection::NotValid));
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_request() {
        let server = MockServer::start().await;
        validate()
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"valid": true, "login": "a"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        resolver.enable();
        let (a, b) = tokio::join!(resolver.resolve(), resolver.resolve());
        assert_eq!(a, b);
        assert!(matches!(a, State::Valid(_)));
    }

    #[tokio::test]
    async fn redirect_happens_once_per_invalid_verdict() {
        let server = MockServer::start().await;
        let (resolver, recorder) = resolver(&server, Delivery::Token);
        resolver.gateway().tokens().set(&Credential::new("stale")).await.unwrap();

        let (a, b, c) = tokio::join!(
            resolver.redirect_to_login(),
            resolver.redirect_to_login(),
            resolver.redirect_to_login()
        );
        assert_eq!([a, b, c].iter().filter(|done| **done).count(), 1);
        assert_eq!(recorder.navigations_to(navigate::LOGIN_ROUTE), 1);
        assert_eq!(resolver.gateway().tokens().get().await.unwrap(), None);
        assert!(!resolver.redirect_to_login().await);
    }

    #[tokio::test]
    async fn later_rejections_still_clear_the_credential() {
        let server = MockServer::start().await;
        let (resolver, recorder) = resolver(&server, Delivery::Token);
        assert!(resolver.redirect_to_login().await);

        resolver.gateway().tokens().set(&Credential::new("fresh")).await.unwrap();
        resolver
            .cache()
            .set(keys::ORG_ID, 1_u32, QueryOptions::default())
            .await;
        assert!(!resolver.redirect_to_login().await);

        assert_eq!(resolver.gateway().tokens().get().await.unwrap(), None);
        assert!(resolver.cache().peek::<u32>(keys::ORG_ID).await.unwrap().is_none());
        assert_eq!(recorder.navigations_to(navigate::LOGIN_ROUTE), 1);
    }

    #[tokio::test]
    async fn logout_clears_everything_even_if_backend_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGOUT_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, recorder) = resolver(&server, Delivery::Token);
        resolver.gateway().tokens().set(&Credential::new("t")).await.unwrap();
        resolver.logout().await.unwrap();

        assert_eq!(resolver.gateway().tokens().get().await.unwrap(), None);
        assert_eq!(recorder.navigations_to(navigate::LOGIN_ROUTE), 1);
        assert_eq!(
            resolver.state(),
            State::Invalid(Rejection::MissingCredential)
        );
    }

    #[tokio::test]
    async fn organization_is_shape_checked_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ORG_ID_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orgId": 991,
                "login": "acme",
                "vcs_type": "gitlab",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        let first = resolver.organization().await.unwrap();
        let second = resolver.organization().await.unwrap();
        assert_eq!(first.org_id, Identifier::Number(991));
        assert_eq!(first, second);
    }
}
