use axum::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use http::HeaderMap;

use common::model::flatten;
use common::prelude::Caller;

use crate::object_service::ObjectError;
use crate::service_state::Impersonation;
use crate::ServiceState;

/// The resolved caller of a request.
#[derive(Debug, Clone)]
pub struct Identity(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The DN a request acts as.
///
/// The client certificate DN is the caller unless it is whitelisted for
/// impersonation, in which case the user header (or the external system
/// header) names who it acts for.
pub fn acting_dn(headers: &HeaderMap, impersonation: &Impersonation) -> Result<String, ObjectError> {
    let names = &impersonation.headers;
    let client = header(headers, &names.ssl_client_s_dn).ok_or_else(|| {
        ObjectError::PermissionDenied(format!("missing {} header", names.ssl_client_s_dn))
    })?;

    let flat = flatten(client);
    let trusted = impersonation
        .whitelist
        .iter()
        .any(|allowed| flatten(allowed) == flat);
    if !trusted {
        return Ok(client.to_string());
    }

    match header(headers, &names.user_dn).or_else(|| header(headers, &names.external_sys_dn)) {
        Some(user) => {
            tracing::debug!(proxy = client, user, "impersonating");
            Ok(user.to_string())
        }
        None => Ok(client.to_string()),
    }
}

#[async_trait]
impl FromRequestParts<ServiceState> for Identity {
    type Rejection = ObjectError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let dn = acting_dn(&parts.headers, state.impersonation())?;
        let caller = state.objects().caller(&dn).await?;
        Ok(Identity(caller))
    }
}
