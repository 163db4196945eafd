use crate::context::Context;
use crate::validation::ValidationErrorResponse;

/// Implemented by request structs that bind from path params, query string,
/// headers, and/or the JSON body. Hand-written impls are fully supported;
/// `#[derive(Bind)]` (in `lokstra-macros`) generates one from field
/// attributes (`#[path("id")]`, `#[query("limit")]`, `#[header("Accept")]`,
/// `#[json]`, `#[validate]`) the same way `serde`'s derive generates
/// `Deserialize`.
pub trait Bindable: Sized {
    fn bind(ctx: &Context) -> Result<Self, ValidationErrorResponse>;
}

/// A single field-binding failure, collected into a `ValidationErrorResponse`
/// by a generated `bind()` so every tag failure is reported together instead
/// of stopping at the first one.
pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> crate::validation::FieldError {
    crate::validation::FieldError {
        field: field.into(),
        message: message.into(),
        code: "binding".to_string(),
    }
}
