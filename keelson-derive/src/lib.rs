//! A derive macro for the `Named` trait in the `keelson` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

/// Derives `keelson::Named` for a struct or enum.
///
/// The name defaults to the type name with its first character lowercased
/// (`HTTPRequest` becomes `hTTPRequest`) and the version to `"0"`. Both can be set with `#[named(name = "...", version = "...")]`.
///
/// ```ignore
/// #[derive(Named, Serialize, Deserialize)]
/// #[named(version = "2")]
/// struct WidgetCreated { name: String }
/// // WidgetCreated::versioned_name() == VersionedName::new("widgetCreated", "2")
/// ```
#[proc_macro_derive(Named, attributes(named))]
pub fn named_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &input.ident;
    let mut name = default_name(&ident.to_string());
    let mut version = String::from("0");

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("named")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = meta.value()?.parse::<LitStr>()?.value();
            } else if meta.path.is_ident("version") {
                version = meta.value()?.parse::<LitStr>()?.value();
            } else {
                return Err(meta.error("expected `name` or `version`"));
            }
            Ok(())
        })?;
    }

    if name.is_empty() {
        return Err(syn::Error::new_spanned(ident, "`name` must not be empty"));
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::keelson::Named for #ident #ty_generics #where_clause {
            fn versioned_name() -> ::keelson::VersionedName {
                ::keelson::VersionedName::new(#name, #version)
            }
        }
    })
}

fn default_name(ident: &str) -> String {
    let mut chars = ident.chars();
    chars
        .next()
        .map(|first| first.to_lowercase().chain(chars).collect())
        .unwrap_or_default()
}
