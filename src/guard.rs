// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use log::debug;

use crate::session::{Rejection, Resolver, SessionVerdict, State};

/// What the protected area of the dashboard may show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Gate {
    Loading,
    /// The session is invalid and the user has been sent to log in.
    Redirecting(Rejection),
    Authenticated(Arc<SessionVerdict>),
}

impl Gate {
    fn of(state: &State) -> Self {
        match state {
            State::Uninitialized | State::Validating => Self::Loading,
            State::Invalid(rejection) => Self::Redirecting(rejection.clone()),
            State::Valid(verdict) => Self::Authenticated(Arc::clone(verdict)),
        }
    }

    /// Produces protected content only for an authenticated session.
    pub(crate) fn content<T>(&self, f: impl FnOnce(&Arc<SessionVerdict>) -> T) -> Option<T> {
        match self {
            Self::Authenticated(verdict) => Some(f(verdict)),
            Self::Loading | Self::Redirecting(_) => None,
        }
    }
}

pub(crate) struct DashboardGuard {
    resolver: Arc<Resolver>,
}

impl DashboardGuard {
    pub(crate) fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Gate {
        Gate::of(&self.resolver.state())
    }

    /// Resolves the session and, if it is invalid, clears it and redirects
    /// to the login route (once, however many guards observe it).
    pub(crate) async fn check(&self) -> Gate {
        let state = self.resolver.resolve().await;
        if let State::Invalid(_) = state {
            if self.resolver.redirect_to_login().await {
                debug!("Guard redirected an invalid session to login");
            }
        }
        Gate::of(&state)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        navigate::LOGIN_ROUTE,
        session::{testing::resolver, Delivery, VALIDATE_PATH},
        token::Credential,
    };

    #[tokio::test]
    async fn disabled_resolver_keeps_the_gate_loading() {
        let server = MockServer::start().await;
        let (resolver, recorder) = resolver(&server, Delivery::Cookie);
        let guard = DashboardGuard::new(resolver);

        let gate = guard.check().await;
        assert_eq!(gate, Gate::Loading);
        assert_eq!(gate.content(|_| "secret"), None);
        assert!(recorder.moves().is_empty());
    }

    #[tokio::test]
    async fn valid_sessions_unlock_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VALIDATE_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"valid": true, "login": "mona"})),
            )
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server, Delivery::Cookie);
        resolver.enable();
        let guard = DashboardGuard::new(resolver);

        let gate = guard.check().await;
        assert_eq!(
            gate.content(|verdict| verdict.login.clone()),
            Some(Some("mona".to_owned()))
        );
        assert_eq!(guard.current(), gate);
    }

    #[tokio::test]
    async fn concurrent_guards_redirect_an_invalid_session_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(VALIDATE_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (resolver, recorder) = resolver(&server, Delivery::Token);
        resolver.gateway().tokens().set(&Credential::new("expired")).await.unwrap();
        resolver.enable();
        let first = DashboardGuard::new(Arc::clone(&resolver));
        let second = DashboardGuard::new(Arc::clone(&resolver));

        let (a, b) = tokio::join!(first.check(), second.check());
        for gate in [a, b] {
            assert!(matches!(gate, Gate::Redirecting(_)));
            assert_eq!(gate.content(|_| ()), None);
        }
        assert_eq!(recorder.navigations_to(LOGIN_ROUTE), 1);
        assert_eq!(resolver.gateway().tokens().get().await.unwrap(), None);
        assert!(matches!(
            resolver.state(),
            State::Invalid(Rejection::Status(StatusCode::UNAUTHORIZED))
                | State::Invalid(Rejection::MissingCredential)
        ));
    }
}
