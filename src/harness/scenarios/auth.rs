//! `/auth/*` scenarios

use serde_json::{json, Value};

use crate::harness::client::Reply;
use crate::harness::recorder::FailureKind;

use super::{registration, ScenarioContext};

/// Every scenario runs against an empty store, so the first account is 1
pub(super) const FIRST_ACCOUNT_ID: i64 = 1;

/// Register the fixture account and return its id
pub(super) async fn register(ctx: &mut ScenarioContext<'_>) -> Option<i64> {
    const LABEL: &str = "register";

    let body = registration(ctx.account);
    let reply = ctx.post(LABEL, "/auth/register", &body).await?;
    ctx.state.expect(LABEL, "status", &reply.status, &201);

    let body = ctx.json(LABEL, &reply)?;
    ctx.state.expect(
        LABEL,
        "account_id",
        &body,
        &json!({ "account_id": FIRST_ACCOUNT_ID }),
    );

    ctx.proceed(FIRST_ACCOUNT_ID)
}

/// Resending verification while the first one is still pending is refused
pub(super) async fn register_resend(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "register_resend";

    let account_id = register(ctx).await?;
    let path = format!("/auth/resend_verification/{}", account_id);
    let reply = ctx.post_empty(LABEL, &path).await?;
    ctx.state.expect(LABEL, "status", &reply.status, &400);

    ctx.proceed(())
}

/// Register, then follow the verification link using the stored token
pub(super) async fn register_verify(ctx: &mut ScenarioContext<'_>) -> Option<i64> {
    const LABEL: &str = "register_verify";

    let account_id = register(ctx).await?;
    let tables = ctx.tables;
    let token = ctx.token(LABEL, &tables.verification, account_id)?;

    let reply = ctx.get(LABEL, &format!("/auth/verify/{}", token)).await?;
    expect_success_page(ctx, LABEL, &reply);

    ctx.proceed(account_id)
}

/// An unverified account cannot log in
pub(super) async fn login_unverified(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "login_unverified";

    register(ctx).await?;
    let account = ctx.account;
    let reply = ctx
        .post(LABEL, "/auth/login", &credentials(&account.email, &account.password))
        .await?;
    ctx.state.expect(LABEL, "status", &reply.status, &400);

    ctx.proceed(())
}

/// Register, verify and log in; returns the session jwt
pub(super) async fn login(ctx: &mut ScenarioContext<'_>) -> Option<String> {
    const LABEL: &str = "login";

    register_verify(ctx).await?;
    let account = ctx.account;
    login_with(ctx, LABEL, &account.email, &account.password).await
}

/// Log in with explicit credentials and extract the jwt
pub(super) async fn login_with(
    ctx: &mut ScenarioContext<'_>,
    label: &str,
    email: &str,
    password: &str,
) -> Option<String> {
    let reply = ctx.post(label, "/auth/login", &credentials(email, password)).await?;
    ctx.state.expect(label, "status", &reply.status, &200);
    ctx.state
        .expect_pattern(label, "body", &reply.body, r#"\{"jwt":.*\}"#);

    let body = ctx.json(label, &reply)?;
    match body.get("jwt").and_then(Value::as_str) {
        Some(jwt) => ctx.proceed(jwt.to_string()),
        None => {
            ctx.state.fail(
                label,
                FailureKind::AssertionMismatch,
                format!("Expected jwt to be a string, but body is {}", body),
            );
            None
        }
    }
}

/// Logging out ends the session: the same jwt is refused afterwards
pub(super) async fn logout(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "logout";

    let jwt = login(ctx).await?;
    let reply = ctx.post(LABEL, "/auth/logout", &json!({ "jwt": jwt })).await?;
    ctx.state.expect(LABEL, "status", &reply.status, &200);

    let reply = ctx
        .post(LABEL, "/auth/retrieve_user", &json!({ "jwt": jwt }))
        .await?;
    ctx.state
        .expect(LABEL, "status after logout", &reply.status, &400);

    ctx.proceed(())
}

/// The session's own profile matches what was registered
pub(super) async fn retrieve_user(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "retrieve_user";

    let jwt = login(ctx).await?;
    let account = ctx.account;
    let expected = json!({
        "account_id": FIRST_ACCOUNT_ID,
        "email": account.email,
        "first_name": account.first_name,
        "last_name": account.last_name,
        "gender": account.gender,
    });
    expect_session_profile(ctx, LABEL, &jwt, &expected).await
}

/// Request a password reset and confirm it through the stored reset token
pub(super) async fn password_reset(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "password_reset";

    let account_id = register(ctx).await?;
    let account = ctx.account;
    let reply = ctx
        .post(
            LABEL,
            "/auth/password_reset",
            &credentials(&account.email, &account.new_password),
        )
        .await?;
    ctx.state.expect(LABEL, "status", &reply.status, &200);

    let tables = ctx.tables;
    let token = ctx.token(LABEL, &tables.password_reset, account_id)?;
    let reply = ctx
        .get(LABEL, &format!("/auth/password_reset/verify/{}", token))
        .await?;
    ctx.state
        .expect_pattern(LABEL, "body", &reply.body, ".*successful.*");

    ctx.proceed(())
}

/// Delete the account through the stored confirmation token; the count drops to 0
pub(super) async fn delete_user(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "delete_user";

    let account_id = register_verify(ctx).await?;
    let account = ctx.account;
    let reply = ctx
        .post(LABEL, "/auth/delete_user", &json!({ "email": account.email }))
        .await?;
    ctx.state.expect(LABEL, "status", &reply.status, &200);

    let tables = ctx.tables;
    let token = ctx.token(LABEL, &tables.account_deletion, account_id)?;
    let reply = ctx
        .get(LABEL, &format!("/auth/delete_user/verify/{}", token))
        .await?;
    expect_success_page(ctx, LABEL, &reply);

    let reply = ctx.get(LABEL, "/user/retrieve/count").await?;
    ctx.state.expect(LABEL, "count status", &reply.status, &200);
    let count = ctx.json(LABEL, &reply)?;
    ctx.state.expect(LABEL, "count", &count, &json!(0));

    ctx.proceed(())
}

/// `POST /auth/retrieve_user` and compare the whole profile
pub(super) async fn expect_session_profile(
    ctx: &mut ScenarioContext<'_>,
    label: &str,
    jwt: &str,
    expected: &Value,
) -> Option<()> {
    let reply = ctx
        .post(label, "/auth/retrieve_user", &json!({ "jwt": jwt }))
        .await?;
    ctx.state.expect(label, "status", &reply.status, &200);

    let body = ctx.json(label, &reply)?;
    ctx.state.expect(label, "profile", &body, expected);

    ctx.proceed(())
}

/// Token links answer with an HTML page; success is any 2xx whose body says so
pub(super) fn expect_success_page(ctx: &mut ScenarioContext<'_>, label: &str, reply: &Reply) {
    let class = format!("{}xx", reply.status / 100);
    ctx.state.expect(label, "status class", class.as_str(), "2xx");
    ctx.state
        .expect_pattern(label, "body", &reply.body, ".*successful.*");
}

fn credentials(email: &str, password: &str) -> Value {
    json!({
        "email": email,
        "plaintext_password": password,
    })
}
