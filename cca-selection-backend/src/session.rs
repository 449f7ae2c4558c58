use async_trait::async_trait;
use cookie::Cookie;
use http::header::COOKIE;
use http::Request;

use crate::error::AppError;
use crate::ledger::LedgerError;

const COOKIE_NAME_SESSION: &str = "session";

/// The user behind a request, as established at login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub department: String,
    pub email: String,
}

impl Identity {
    /// See [`student_number`].
    #[must_use]
    pub fn student_id(&self) -> Option<&str> {
        student_number(&self.email)
    }
}

/// Student number in a school email address: the local part without a leading
/// `s` or `S`.
#[must_use]
pub fn student_number(email: &str) -> Option<&str> {
    let (local, _) = email.split_once('@')?;
    let id = local.strip_prefix(['s', 'S']).unwrap_or(local);
    (!id.is_empty()).then_some(id)
}

#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
    /// The identity owning the unexpired session `token`.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, LedgerError>;
}

pub fn session_token<T>(request: &Request<T>) -> Option<String> {
    request
        .headers()
        .get_all(COOKIE)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .map(std::borrow::ToOwned::to_owned)
        .flat_map(Cookie::split_parse)
        .filter_map(std::result::Result::ok)
        .find(|cookie| cookie.name() == COOKIE_NAME_SESSION)
        .map(|cookie| cookie.value().to_owned())
}

/// Resolves the session cookie of a request, see [`session_token`].
pub async fn identify(
    resolver: &dyn SessionResolver,
    token: Option<String>,
) -> Result<Identity, AppError> {
    let token = token.ok_or(AppError::NoSession)?;
    resolver
        .resolve(&token)
        .await?
        .ok_or(AppError::UnknownSession)
}
