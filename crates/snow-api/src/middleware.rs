use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::auth::JwtKeys;
use crate::error::{Result, ServiceError};
use crate::session::SessionContext;

/// Validate the bearer token and attach a `SessionContext` to the request.
pub async fn require_auth(
    State(keys): State<JwtKeys>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ServiceError::AuthenticationFailed)?;
    let claims = keys.verify(bearer.token())?;

    req.extensions_mut().insert(SessionContext::from(claims));
    Ok(next.run(req).await)
}
