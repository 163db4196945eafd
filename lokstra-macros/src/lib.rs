//! `#[derive(Bind)]` — generates a `Bindable` impl from field attributes,
//! the same relationship `serde_derive` has to `Deserialize`: the trait is
//! hand-implementable, the derive is sugar over the same surface.

extern crate proc_macro;
use proc_macro::TokenStream;

pub(crate) mod bind_derive;

/// Derives `lokstra_core::binding::Bindable` for a struct from per-field
/// binding attributes.
///
/// | Attribute | Source |
/// |-----------|--------|
/// | `#[path("name")]` / `#[path]` | route path parameter (field name if bare) |
/// | `#[query("name")]` / `#[query]` | query string parameter |
/// | `#[header("Name")]` | request header |
/// | `#[json]` | the entire request body, deserialized into this one field |
/// | *(none)* | one member of the request body, read as JSON |
///
/// Adding `#[validate]` to a field runs `garde::Validate` on the bound value
/// (a no-op if the field's type doesn't implement it) and folds any failures
/// into the surrounding struct's error list under `"<field>.<nested>"`.
/// `Option<T>` fields are optional for every source above: a missing
/// path/query/header value resolves to `None` instead of a binding error.
///
/// Every field failure is collected before returning, not just the first —
/// callers see the full set of broken tags in one response, the same
/// behavior `garde::Validate` itself gives for field-level rule violations.
/// After every field binds successfully the whole struct is also run
/// through `garde::Validate` if it implements it, so struct-level rules
/// (cross-field checks) still apply without a separate attribute.
#[proc_macro_derive(Bind, attributes(path, query, header, json, validate))]
pub fn derive_bind(input: TokenStream) -> TokenStream {
    bind_derive::expand(input)
}
