//! Scenario library
//!
//! Each scenario drives the live service over HTTP, optionally reads one
//! token from the store, and checks what it sees through the [`RunState`].
//! Scenarios reuse each other for setup: `login` first runs
//! `register_verify`, `logout` first runs `login`, and so on.
//!
//! Every step returns an `Option`. `None` means the run is halted (a check
//! failed, a request failed, or a token was missing), and the caller returns
//! immediately with `?`. Once halted, no scenario issues another request or
//! store lookup.

mod auth;
mod user;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::config::{Account, StoreConfig, TokenTable};
use crate::common::Error;

use super::bridge::TokenSource;
use super::client::{Reply, ServiceClient};
use super::recorder::RunState;

/// Everything a scenario may touch
pub struct ScenarioContext<'a> {
    pub client: &'a ServiceClient,
    pub store: &'a dyn TokenSource,
    pub tables: &'a StoreConfig,
    pub account: &'a Account,
    pub state: &'a mut RunState,
}

impl ScenarioContext<'_> {
    /// `POST path` with a JSON body
    pub async fn post<B: Serialize + ?Sized>(
        &mut self,
        label: &str,
        path: &str,
        body: &B,
    ) -> Option<Reply> {
        if self.state.is_halted() {
            return None;
        }
        let result = self.client.post(path, body).await;
        self.state.settle(label, result)
    }

    /// `POST path` without a body
    pub async fn post_empty(&mut self, label: &str, path: &str) -> Option<Reply> {
        if self.state.is_halted() {
            return None;
        }
        let result = self.client.post_empty(path).await;
        self.state.settle(label, result)
    }

    /// `GET path`
    pub async fn get(&mut self, label: &str, path: &str) -> Option<Reply> {
        if self.state.is_halted() {
            return None;
        }
        let result = self.client.get(path).await;
        self.state.settle(label, result)
    }

    /// Read the token the service stored for `account_id`
    pub fn token(&mut self, label: &str, table: &TokenTable, account_id: i64) -> Option<String> {
        if self.state.is_halted() {
            return None;
        }
        let result = self.store.fetch_token(table, account_id);
        self.state.settle(label, result)
    }

    /// Parse a reply body as JSON
    pub fn json(&mut self, label: &str, reply: &Reply) -> Option<Value> {
        let result = reply.json();
        self.state.settle(label, result)
    }

    /// Hand `value` to the caller unless one of the checks halted the run
    pub fn proceed<T>(&self, value: T) -> Option<T> {
        if self.state.is_halted() {
            None
        } else {
            Some(value)
        }
    }
}

/// A named scenario, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Register,
    RegisterResend,
    RegisterVerify,
    LoginUnverified,
    Login,
    Logout,
    RetrieveUser,
    PasswordReset,
    RetrieveByEmail,
    RetrieveById,
    RetrieveByName,
    RetrieveCount,
    ModifyNames,
    ModifyGender,
    ModifyPassword,
    ModifyEmail,
    DeleteUser,
}

impl Scenario {
    /// Default run order
    pub const ALL: [Scenario; 17] = [
        Scenario::Register,
        Scenario::RegisterResend,
        Scenario::RegisterVerify,
        Scenario::LoginUnverified,
        Scenario::Login,
        Scenario::Logout,
        Scenario::RetrieveUser,
        Scenario::PasswordReset,
        Scenario::RetrieveByEmail,
        Scenario::RetrieveById,
        Scenario::RetrieveByName,
        Scenario::RetrieveCount,
        Scenario::ModifyNames,
        Scenario::ModifyGender,
        Scenario::ModifyPassword,
        Scenario::ModifyEmail,
        Scenario::DeleteUser,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Scenario::Register => "register",
            Scenario::RegisterResend => "register_resend",
            Scenario::RegisterVerify => "register_verify",
            Scenario::LoginUnverified => "login_unverified",
            Scenario::Login => "login",
            Scenario::Logout => "logout",
            Scenario::RetrieveUser => "retrieve_user",
            Scenario::PasswordReset => "password_reset",
            Scenario::RetrieveByEmail => "retrieve_by_email",
            Scenario::RetrieveById => "retrieve_by_id",
            Scenario::RetrieveByName => "retrieve_by_name",
            Scenario::RetrieveCount => "retrieve_count",
            Scenario::ModifyNames => "modify_names",
            Scenario::ModifyGender => "modify_gender",
            Scenario::ModifyPassword => "modify_password",
            Scenario::ModifyEmail => "modify_email",
            Scenario::DeleteUser => "delete_user",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::Register => "Register a fresh account; expect 201 and account_id 1",
            Scenario::RegisterResend => "Resending verification before verifying is rejected with 400",
            Scenario::RegisterVerify => "Follow the stored verification token; expect success page",
            Scenario::LoginUnverified => "Login before verifying is rejected with 400",
            Scenario::Login => "Login with the registered credentials; expect a jwt",
            Scenario::Logout => "Logout ends the session; the jwt stops working",
            Scenario::RetrieveUser => "The session's profile matches the registered identity",
            Scenario::PasswordReset => "Request a reset and follow the stored reset token",
            Scenario::RetrieveByEmail => "Public profile lookup by email",
            Scenario::RetrieveById => "Public profile lookup by account id",
            Scenario::RetrieveByName => "Public profile lookup by first and last name",
            Scenario::RetrieveCount => "Account count is 1 after one registration",
            Scenario::ModifyNames => "Change first and last name; the profile reflects both",
            Scenario::ModifyGender => "Invalid gender is rejected; a valid change sticks",
            Scenario::ModifyPassword => "Change password; the old session ends, the new password works",
            Scenario::ModifyEmail => "Change email through the stored confirmation token",
            Scenario::DeleteUser => "Delete the account through the stored confirmation token",
        }
    }

    /// Run the scenario against the current service instance
    pub async fn run(self, ctx: &mut ScenarioContext<'_>) {
        tracing::debug!(label = self.label(), "Running scenario");

        // The value of a top-level run is only of interest to composing callers
        let _ = match self {
            Scenario::Register => auth::register(ctx).await.map(drop),
            Scenario::RegisterResend => auth::register_resend(ctx).await,
            Scenario::RegisterVerify => auth::register_verify(ctx).await.map(drop),
            Scenario::LoginUnverified => auth::login_unverified(ctx).await,
            Scenario::Login => auth::login(ctx).await.map(drop),
            Scenario::Logout => auth::logout(ctx).await,
            Scenario::RetrieveUser => auth::retrieve_user(ctx).await,
            Scenario::PasswordReset => auth::password_reset(ctx).await,
            Scenario::RetrieveByEmail => user::retrieve_by_email(ctx).await,
            Scenario::RetrieveById => user::retrieve_by_id(ctx).await,
            Scenario::RetrieveByName => user::retrieve_by_name(ctx).await,
            Scenario::RetrieveCount => user::retrieve_count(ctx).await,
            Scenario::ModifyNames => user::modify_names(ctx).await,
            Scenario::ModifyGender => user::modify_gender(ctx).await,
            Scenario::ModifyPassword => user::modify_password(ctx).await,
            Scenario::ModifyEmail => user::modify_email(ctx).await,
            Scenario::DeleteUser => auth::delete_user(ctx).await,
        };
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.label() == s)
            .ok_or_else(|| Error::UnknownScenario(s.to_string()))
    }
}

/// Body of `POST /auth/register` for `account`
pub(crate) fn registration(account: &Account) -> Value {
    serde_json::json!({
        "email": account.email,
        "plaintext_password": account.password,
        "first_name": account.first_name,
        "last_name": account.last_name,
        "gender": account.gender,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::common::config::ServiceEndpoint;
    use crate::common::Result;

    /// Counts lookups and never finds anything
    #[derive(Default)]
    struct CountingStore {
        lookups: AtomicUsize,
    }

    impl TokenSource for CountingStore {
        fn fetch_token(&self, table: &TokenTable, key: i64) -> Result<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Err(Error::MissingExternalState {
                table: table.table.clone(),
                key,
            })
        }
    }

    /// A client pointing at a port nothing listens on
    fn dead_client() -> ServiceClient {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = ServiceEndpoint {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
        };
        drop(listener);
        ServiceClient::new(&endpoint, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_labels_are_unique_and_parse_back() {
        let labels: HashSet<&str> = Scenario::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(labels.len(), Scenario::ALL.len());

        for scenario in Scenario::ALL {
            assert_eq!(scenario.label().parse::<Scenario>().unwrap(), scenario);
        }
        assert!(matches!(
            "no_such_scenario".parse::<Scenario>(),
            Err(Error::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_serde_uses_labels() {
        let parsed: Vec<Scenario> = serde_yaml::from_str("[login, retrieve_by_email]").unwrap();
        assert_eq!(parsed, vec![Scenario::Login, Scenario::RetrieveByEmail]);
    }

    #[tokio::test]
    async fn test_halted_run_issues_no_requests_or_lookups() {
        let client = dead_client();
        let store = CountingStore::default();
        let tables = StoreConfig::default();
        let account = Account::default();
        let mut state = RunState::quiet();
        state.expect("earlier", "status", &500, &200);

        for scenario in Scenario::ALL {
            let mut ctx = ScenarioContext {
                client: &client,
                store: &store,
                tables: &tables,
                account: &account,
                state: &mut state,
            };
            scenario.run(&mut ctx).await;
        }

        // A request against the dead port would have logged a transport
        // failure line; a lookup would have bumped the counter
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(state.failures().len(), 1);
        assert_eq!(state.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_halts_composed_scenario() {
        let client = dead_client();
        let store = CountingStore::default();
        let tables = StoreConfig::default();
        let account = Account::default();
        let mut state = RunState::quiet();

        let mut ctx = ScenarioContext {
            client: &client,
            store: &store,
            tables: &tables,
            account: &account,
            state: &mut state,
        };
        Scenario::Logout.run(&mut ctx).await;

        // logout -> login -> register_verify -> register failed on its first request
        let failure = state.first_failure().unwrap();
        assert_eq!(failure.label, "register");
        assert_eq!(failure.kind, crate::harness::recorder::FailureKind::Transport);
        assert_eq!(state.failures().len(), 1);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }
}
