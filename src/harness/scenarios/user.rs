//! `/user/*` scenarios: public lookups and profile updates

use serde_json::{json, Value};

use crate::common::config::Account;

use super::auth::{
    expect_session_profile, expect_success_page, login, login_with, register, FIRST_ACCOUNT_ID,
};
use super::ScenarioContext;

/// Public profile of a freshly registered account
fn public_profile(account: &Account, email: &str) -> Value {
    json!({
        "account_id": FIRST_ACCOUNT_ID,
        "email": email,
        "first_name": account.first_name,
        "last_name": account.last_name,
        "gender": account.gender,
        "points": 0,
    })
}

/// `POST /user/retrieve/<key>` and compare against the fresh public profile
async fn expect_lookup(
    ctx: &mut ScenarioContext<'_>,
    label: &str,
    key: &str,
    query: &Value,
    expected: &Value,
) -> Option<()> {
    let reply = ctx
        .post(label, &format!("/user/retrieve/{}", key), query)
        .await?;
    ctx.state.expect(label, "status", &reply.status, &200);

    let body = ctx.json(label, &reply)?;
    ctx.state.expect(label, "profile", &body, expected);

    ctx.proceed(())
}

pub(super) async fn retrieve_by_email(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "retrieve_by_email";

    register(ctx).await?;
    let account = ctx.account;
    let query = json!({ "email": account.email });
    expect_lookup(ctx, LABEL, "email", &query, &public_profile(account, &account.email)).await
}

pub(super) async fn retrieve_by_id(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "retrieve_by_id";

    let account_id = register(ctx).await?;
    let account = ctx.account;
    let query = json!({ "account_id": account_id });
    expect_lookup(ctx, LABEL, "id", &query, &public_profile(account, &account.email)).await
}

pub(super) async fn retrieve_by_name(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "retrieve_by_name";

    register(ctx).await?;
    let account = ctx.account;
    let query = json!({
        "first_name": account.first_name,
        "last_name": account.last_name,
    });
    expect_lookup(ctx, LABEL, "name", &query, &public_profile(account, &account.email)).await
}

/// The count equals the number of accounts registered against this instance
pub(super) async fn retrieve_count(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "retrieve_count";

    register(ctx).await?;
    let reply = ctx.get(LABEL, "/user/retrieve/count").await?;
    ctx.state.expect(LABEL, "status", &reply.status, &200);

    let count = ctx.json(LABEL, &reply)?;
    ctx.state.expect(LABEL, "count", &count, &json!(1));

    ctx.proceed(())
}

pub(super) async fn modify_names(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "modify_names";

    let jwt = login(ctx).await?;
    let account = ctx.account;

    modify(ctx, LABEL, "first_name", &jwt, &account.new_first_name, 200).await?;
    modify(ctx, LABEL, "last_name", &jwt, &account.new_last_name, 200).await?;

    let expected = json!({
        "account_id": FIRST_ACCOUNT_ID,
        "email": account.email,
        "first_name": account.new_first_name,
        "last_name": account.new_last_name,
        "gender": account.gender,
    });
    expect_session_profile(ctx, LABEL, &jwt, &expected).await
}

pub(super) async fn modify_gender(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "modify_gender";

    let jwt = login(ctx).await?;
    let account = ctx.account;
    let other = if account.gender == "m" { "f" } else { "m" };

    modify(ctx, LABEL, "gender", &jwt, "x", 400).await?;
    modify(ctx, LABEL, "gender", &jwt, other, 200).await?;

    let expected = json!({
        "account_id": FIRST_ACCOUNT_ID,
        "email": account.email,
        "first_name": account.first_name,
        "last_name": account.last_name,
        "gender": other,
    });
    expect_session_profile(ctx, LABEL, &jwt, &expected).await
}

/// A password change ends every session; only the new password logs in
pub(super) async fn modify_password(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "modify_password";

    let jwt = login(ctx).await?;
    let account = ctx.account;

    modify(ctx, LABEL, "password", &jwt, &account.new_password, 200).await?;

    let reply = ctx
        .post(LABEL, "/auth/retrieve_user", &json!({ "jwt": jwt }))
        .await?;
    ctx.state
        .expect(LABEL, "old session status", &reply.status, &400);

    login_with(ctx, LABEL, &account.email, &account.new_password)
        .await
        .map(drop)
}

/// Change email through the stored confirmation token, then find the account by it
pub(super) async fn modify_email(ctx: &mut ScenarioContext<'_>) -> Option<()> {
    const LABEL: &str = "modify_email";

    let jwt = login(ctx).await?;
    let account = ctx.account;

    modify(ctx, LABEL, "email", &jwt, &account.new_email, 200).await?;

    let tables = ctx.tables;
    let token = ctx.token(LABEL, &tables.email_update, FIRST_ACCOUNT_ID)?;
    let reply = ctx
        .get(LABEL, &format!("/user/modify/email/verify/{}", token))
        .await?;
    expect_success_page(ctx, LABEL, &reply);

    let query = json!({ "email": account.new_email });
    let expected = public_profile(account, &account.new_email);
    expect_lookup(ctx, LABEL, "email", &query, &expected).await
}

/// `POST /user/modify/<field>` on the fixture account
async fn modify(
    ctx: &mut ScenarioContext<'_>,
    label: &str,
    field: &str,
    jwt: &str,
    new_value: &str,
    expected_status: u16,
) -> Option<()> {
    let body = json!({
        "jwt": jwt,
        "new_value": new_value,
        "account_id": FIRST_ACCOUNT_ID,
    });
    let reply = ctx
        .post(label, &format!("/user/modify/{}", field), &body)
        .await?;
    ctx.state.expect(
        label,
        &format!("{} update status", field),
        &reply.status,
        &expected_status,
    );

    ctx.proceed(())
}
