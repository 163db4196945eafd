use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type};

enum FieldSource {
    Path(String),
    Query(String),
    Header(String),
    /// The whole request body deserializes into this one field.
    Json,
    /// No binding attribute — this field is one member of the body object.
    BodyMember,
}

struct BindField {
    ident: Ident,
    ty: Type,
    source: FieldSource,
    optional: bool,
    validate: bool,
}

pub fn expand(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match expand_inner(input) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_inner(input: DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(f) => &f.named,
            _ => return Err(syn::Error::new_spanned(name, "Bind can only be derived for structs with named fields")),
        },
        _ => return Err(syn::Error::new_spanned(name, "Bind can only be derived for structs")),
    };

    let mut bind_fields = Vec::new();
    for field in fields {
        let ident = field.ident.clone().unwrap();
        let ty = field.ty.clone();
        let optional = is_option_type(&ty);
        let mut source = None;
        let mut validate = false;

        for attr in &field.attrs {
            if attr.path().is_ident("path") {
                let name = parse_optional_name(attr)?.unwrap_or_else(|| ident.to_string());
                source = Some(FieldSource::Path(name));
            } else if attr.path().is_ident("query") {
                let name = parse_optional_name(attr)?.unwrap_or_else(|| ident.to_string());
                source = Some(FieldSource::Query(name));
            } else if attr.path().is_ident("header") {
                let name: LitStr = attr.parse_args()?;
                source = Some(FieldSource::Header(name.value()));
            } else if attr.path().is_ident("json") {
                source = Some(FieldSource::Json);
            } else if attr.path().is_ident("validate") {
                validate = true;
            }
        }

        bind_fields.push(BindField {
            ident,
            ty,
            source: source.unwrap_or(FieldSource::BodyMember),
            optional,
            validate,
        });
    }

    let needs_body_value = bind_fields
        .iter()
        .any(|f| matches!(f.source, FieldSource::BodyMember));

    let body_value_decl = if needs_body_value {
        quote! {
            let __body_value: Option<::serde_json::Value> = match ::serde_json::from_slice(__ctx.body()) {
                Ok(v) => Some(v),
                Err(e) => {
                    __errors.push(::lokstra_core::binding::field_error("body", format!("invalid request body: {e}")));
                    None
                }
            };
        }
    } else {
        quote! {}
    };

    let field_bindings: Vec<TokenStream> = bind_fields.iter().map(generate_field_binding).collect();
    let field_idents: Vec<&Ident> = bind_fields.iter().map(|f| &f.ident).collect();

    let expanded = quote! {
        impl #impl_generics ::lokstra_core::binding::Bindable for #name #ty_generics #where_clause {
            fn bind(__ctx: &::lokstra_core::Context) -> ::std::result::Result<Self, ::lokstra_core::validation::ValidationErrorResponse> {
                let mut __errors: Vec<::lokstra_core::validation::FieldError> = Vec::new();

                #body_value_decl

                #(#field_bindings)*

                if !__errors.is_empty() {
                    return Err(::lokstra_core::validation::ValidationErrorResponse { errors: __errors });
                }

                let __bound = Self {
                    #(#field_idents: #field_idents.unwrap(),)*
                };

                if let Err(resp) = (&::lokstra_core::validation::AutoValidator(&__bound)).maybe_validate() {
                    return Err(resp);
                }

                Ok(__bound)
            }
        }
    };

    Ok(expanded)
}

fn generate_field_binding(field: &BindField) -> TokenStream {
    let ident = &field.ident;
    let ty = &field.ty;
    let field_name = ident.to_string();

    let raw_lookup = match &field.source {
        FieldSource::Path(name) => quote! { __ctx.path_param(#name).map(str::to_string) },
        FieldSource::Query(name) => quote! { __ctx.query(#name).map(str::to_string) },
        FieldSource::Header(name) => quote! { __ctx.header(#name).map(str::to_string) },
        FieldSource::Json | FieldSource::BodyMember => quote! { None::<String> },
    };

    let parse_and_push = |inner_ty: &Type, value_expr: TokenStream| -> TokenStream {
        quote! {
            match #value_expr.parse::<#inner_ty>() {
                Ok(v) => Some(v),
                Err(_) => {
                    __errors.push(::lokstra_core::binding::field_error(#field_name, "failed to parse value"));
                    None
                }
            }
        }
    };

    let validate_block = if field.validate {
        quote! {
            if let Some(__v) = &#ident {
                if let Err(__nested) = (&::lokstra_core::validation::AutoValidator(__v)).maybe_validate() {
                    for __fe in __nested.errors {
                        __errors.push(::lokstra_core::validation::FieldError {
                            field: format!("{}.{}", #field_name, __fe.field),
                            message: __fe.message,
                            code: __fe.code,
                        });
                    }
                }
            }
        }
    } else {
        quote! {}
    };

    match &field.source {
        FieldSource::Json => quote! {
            let #ident: Option<#ty> = match ::serde_json::from_slice::<#ty>(__ctx.body()) {
                Ok(v) => Some(v),
                Err(e) => {
                    __errors.push(::lokstra_core::binding::field_error(#field_name, format!("invalid JSON body: {e}")));
                    None
                }
            };
            #validate_block
        },
        FieldSource::BodyMember => {
            let missing_arm = if field.optional {
                quote! { ::serde_json::from_value::<#ty>(::serde_json::Value::Null).ok() }
            } else {
                quote! {
                    {
                        __errors.push(::lokstra_core::binding::field_error(#field_name, "missing body field"));
                        None
                    }
                }
            };
            quote! {
                let #ident: Option<#ty> = match &__body_value {
                    Some(::serde_json::Value::Object(__map)) => match __map.get(#field_name) {
                        Some(__v) => match ::serde_json::from_value::<#ty>(__v.clone()) {
                            Ok(v) => Some(v),
                            Err(e) => {
                                __errors.push(::lokstra_core::binding::field_error(#field_name, format!("invalid value: {e}")));
                                None
                            }
                        },
                        None => #missing_arm,
                    },
                    Some(_) => {
                        __errors.push(::lokstra_core::binding::field_error(#field_name, "request body is not a JSON object"));
                        None
                    }
                    None => None,
                };
                #validate_block
            }
        }
        FieldSource::Path(_) | FieldSource::Query(_) | FieldSource::Header(_) => {
            if field.optional {
                let inner_ty = unwrap_option_type(ty).unwrap();
                let parsed = parse_and_push(inner_ty, quote! { __raw });
                quote! {
                    let #ident: Option<#ty> = match #raw_lookup {
                        Some(__raw) => { let __v: Option<#inner_ty> = #parsed; Some(__v) }
                        None => Some(None),
                    };
                    #validate_block
                }
            } else {
                let parsed = parse_and_push(ty, quote! { __raw });
                quote! {
                    let #ident: Option<#ty> = match #raw_lookup {
                        Some(__raw) => #parsed,
                        None => {
                            __errors.push(::lokstra_core::binding::field_error(#field_name, "missing value"));
                            None
                        }
                    };
                    #validate_block
                }
            }
        }
    }
}

fn parse_optional_name(attr: &syn::Attribute) -> syn::Result<Option<String>> {
    match &attr.meta {
        syn::Meta::Path(_) => Ok(None),
        syn::Meta::List(_) => {
            let lit: LitStr = attr.parse_args()?;
            Ok(Some(lit.value()))
        }
        _ => Ok(None),
    }
}

fn is_option_type(ty: &Type) -> bool {
    unwrap_option_type(ty).is_some()
}

fn unwrap_option_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                        return Some(inner);
                    }
                }
            }
        }
    }
    None
}
