use super::handlers::{auth, health};
use utoipa::openapi::{
    Components, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::login::verify_otp))
        .routes(routes!(auth::session::issue_tokens))
        .routes(routes!(auth::session::refresh))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::principal::me))
        .routes(routes!(auth::principal::admin));

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and store status".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Operator login, tokens and sessions".to_string());

    let openapi = router.get_openapi_mut();
    openapi.tags = Some(vec![health_tag, auth_tag]);
    openapi
        .components
        .get_or_insert_with(Components::default)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

/// Document info taken from the package manifest.
fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = env!("CARGO_PKG_AUTHORS")
        .split(';')
        .next()
        .and_then(author_contact);
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|spdx| {
        let mut license = License::new(spdx);
        license.identifier = Some(spdx.to_string());
        license
    });

    OpenApiBuilder::new().info(info).build()
}

fn author_contact(author: &str) -> Option<Contact> {
    let (name, email) = parse_author(author);
    if name.is_none() && email.is_none() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

/// Split `Name <email>` into its parts.
fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => (
            non_empty(name),
            non_empty(rest.trim_end().trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}
