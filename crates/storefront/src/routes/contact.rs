//! Contact and return-request form handlers.
//!
//! Plain HTML form posts. The visitor always lands back on the form page.

use axum::{
    Form,
    extract::State,
    http::{HeaderMap, header},
    response::Redirect,
};
use chrono::Utc;
use tracing::instrument;

use crate::middleware::rate_limit::ProxyIpKeyExtractor;
use crate::services::contact::{ContactForm, ReturnForm, Submitter};
use crate::state::AppState;

/// Contact form page.
pub const CONTACT_PAGE: &str = "/contact/";

/// Return-request form page.
pub const RETURNS_PAGE: &str = "/retours/";

fn submitter(headers: &HeaderMap) -> Submitter {
    Submitter {
        ip: ProxyIpKeyExtractor::client_ip(headers)
            .map(|ip| ip.to_string())
            .unwrap_or_default(),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    }
}

/// Mail a contact message to the shop.
#[instrument(skip_all)]
pub async fn contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ContactForm>,
) -> Redirect {
    let outcome = state
        .contact()
        .contact(form, &submitter(&headers), Utc::now())
        .await;
    Redirect::to(&outcome.redirect_to(CONTACT_PAGE))
}

/// Mail a return request to the shop.
#[instrument(skip_all)]
pub async fn return_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ReturnForm>,
) -> Redirect {
    let outcome = state
        .contact()
        .return_request(form, &submitter(&headers), Utc::now())
        .await;
    Redirect::to(&outcome.redirect_to(RETURNS_PAGE))
}
