use super::handlers::{health, me, session};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Which optional route groups a router serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RouteSet {
    pub login: bool,
    pub sessions: bool,
}

impl RouteSet {
    pub(crate) const ALL: Self = Self {
        login: true,
        sessions: true,
    };
}

/// Full document, every optional route included.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router(RouteSet::ALL).split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Session routes are only registered when their components were selected at
/// startup, so an unconfigured deployment answers 404 instead of 500.
pub(crate) fn api_router(routes: RouteSet) -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(me::me));

    if routes.login {
        router = router.routes(routes!(session::login));
    }
    if routes.sessions {
        router = router
            .routes(routes!(session::refresh))
            .routes(routes!(session::logout));
    }

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and selected backends".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sessions and identity".to_string());

    router.get_openapi_mut().tags = Some(vec![health_tag, auth_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        Some(value.trim()).filter(|value| !value.is_empty())
    }

    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
