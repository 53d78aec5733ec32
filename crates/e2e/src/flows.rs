//! Reusable browser flows over the admin UI

use cmsprobe_common::{captcha, Credentials, FixtureStore, UserFixture};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};
use crate::playwright::BrowserSession;

const NAME_INPUT: &str = "#edit-name";
const PASS_INPUT: &str = "#edit-pass";
const SUBMIT: &str = "#edit-submit";
const CAPTCHA_CHALLENGE: &str = ".field-prefix";
const CAPTCHA_RESPONSE: &str = "#edit-captcha-response";
const PEOPLE_LINK: &str = "#toolbar-link-entity-user-collection";
const ADD_USER_BUTTON: &str = ".local-actions__item > .button";
const FIRST_USER_CHECKBOX: &str = "#edit-user-bulk-form-0";
const BULK_ACTION: &str = "#edit-action";

/// Log in through the form as a persona
pub async fn user_login(browser: &mut BrowserSession, fixture: &UserFixture) -> E2eResult<()> {
    let username = fixture.username();
    debug!("UI login as {}", username);

    browser.goto("/user/login").await?;
    browser.type_text(NAME_INPUT, &username).await?;
    browser.type_text(PASS_INPUT, &fixture.password).await?;
    browser.click(SUBMIT).await
}

pub async fn user_logout(browser: &mut BrowserSession) -> E2eResult<()> {
    browser.goto("/user/logout").await?;
    Ok(())
}

/// Log in on a form protected by a math CAPTCHA
pub async fn login_with_captcha(browser: &mut BrowserSession, credentials: &Credentials) -> E2eResult<()> {
    browser.goto("/user/login").await?;

    browser.type_text(NAME_INPUT, &credentials.name).await?;
    expect_value(browser, NAME_INPUT, &credentials.name).await?;
    browser.type_text(PASS_INPUT, &credentials.pass).await?;
    expect_value(browser, PASS_INPUT, &credentials.pass).await?;

    let challenge = browser.inner_text(CAPTCHA_CHALLENGE).await?;
    let answer = captcha::solve(&challenge)?;
    debug!("Captcha {:?} = {}", challenge.trim(), answer);
    browser.type_text(CAPTCHA_RESPONSE, &answer.to_string()).await?;

    browser.click(SUBMIT).await
}

async fn expect_value(browser: &mut BrowserSession, selector: &str, expected: &str) -> E2eResult<()> {
    let actual = browser.input_value(selector).await?;
    if actual != expected {
        return Err(E2eError::AssertionFailed(format!(
            "{}: expected {:?}, found {:?}",
            selector, expected, actual
        )));
    }
    Ok(())
}

/// Identifiers of the throwaway account made by [`ui_create_user`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiAccount {
    pub machine_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

impl UiAccount {
    /// Derive the account from a human role label such as `Site Editor`
    pub fn for_role(role_label: &str) -> Self {
        let kebab = role_label
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        let machine_name = format!("govcms-{}", kebab);

        Self {
            email: format!("cypress-tester-{}@govcms.test", machine_name),
            username: format!("@cypresstest-{}", machine_name),
            password: format!("{}#123", machine_name),
            machine_name,
        }
    }
}

/// Create, grant a role to and then cancel an account through the admin UI
///
/// Logs in as the `as_fixture` persona. The account is cancelled with its
/// content deleted at the end, so the site is left as it was found.
pub async fn ui_create_user(
    browser: &mut BrowserSession,
    fixtures: &FixtureStore,
    role_label: &str,
    as_fixture: &str,
) -> E2eResult<UiAccount> {
    let account = UiAccount::for_role(role_label);
    let operator = fixtures.user(as_fixture)?;
    info!("Creating {} through the UI as {}", account.username, operator.username());

    user_login(browser, &operator).await?;

    browser.click(PEOPLE_LINK).await?;
    browser.click(ADD_USER_BUTTON).await?;
    browser.type_text("#edit-mail", &account.email).await?;
    browser.type_text(NAME_INPUT, &account.username).await?;
    browser.type_text("#edit-pass-pass1", &account.password).await?;
    browser.type_text("#edit-pass-pass2", &account.password).await?;
    browser.click(SUBMIT).await?;

    let message = browser.inner_text(".messages-list__item").await?;
    if !message.contains("Created a new user account") {
        return Err(E2eError::AssertionFailed(format!(
            "account creation not confirmed: {:?}",
            message.trim()
        )));
    }

    browser.click(PEOPLE_LINK).await?;
    browser.click(FIRST_USER_CHECKBOX).await?;
    browser
        .select(BULK_ACTION, &format!("Add the {} role to the selected user(s)", role_label))
        .await?;
    browser.click(SUBMIT).await?;

    browser.click(FIRST_USER_CHECKBOX).await?;
    browser.select(BULK_ACTION, "Cancel the selected user account(s)").await?;
    browser.click(SUBMIT).await?;
    browser.click("#edit-user-cancel-method-user-cancel-delete").await?;
    browser.click(SUBMIT).await?;

    Ok(account)
}
