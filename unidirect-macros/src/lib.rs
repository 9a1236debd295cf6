//! Procedural macros for unidirect

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(Action)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action), supports(enum_any))]
struct ActionOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionVariant, ()>,

    /// Prefix prepended to every generated name, e.g. `"auth."`
    #[darling(default)]
    prefix: Option<String>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action))]
struct ActionVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<()>,

    /// Explicit name override
    #[darling(default)]
    rename: Option<String>,
}

/// Derive macro for the Action trait
///
/// Generates a `name()` method that returns the variant name as a static string.
/// Names show up in runtime logs and in the test harness, so keep them stable.
///
/// # Attributes
///
/// - `#[action(prefix = "net.")]` on the enum prefixes every name
/// - `#[action(rename = "Tick")]` on a variant overrides its name
///
/// # Example
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// #[action(prefix = "feed.")]
/// enum FeedAction {
///     Refresh,
///     DidLoad(Vec<String>),
///     #[action(rename = "Failed")]
///     DidFail { reason: String },
/// }
///
/// assert_eq!(FeedAction::Refresh.name(), "feed.Refresh");
/// assert_eq!(FeedAction::DidFail { reason: "x".into() }.name(), "feed.Failed");
/// ```
#[proc_macro_derive(Action, attributes(action))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    let name = &opts.ident;
    let (impl_generics, ty_generics, where_clause) = opts.generics.split_for_impl();

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "Action can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let prefix = opts.prefix.as_deref().unwrap_or("");

    let name_arms = variants.iter().map(|v| -> proc_macro2::TokenStream {
        let variant_name = &v.ident;
        let base = v
            .rename
            .clone()
            .unwrap_or_else(|| variant_name.to_string());
        let variant_str = format!("{prefix}{base}");

        match &v.fields.style {
            darling::ast::Style::Unit => quote! {
                #name::#variant_name => #variant_str
            },
            darling::ast::Style::Tuple => quote! {
                #name::#variant_name(..) => #variant_str
            },
            darling::ast::Style::Struct => quote! {
                #name::#variant_name { .. } => #variant_str
            },
        }
    });

    // An empty enum has no values, so `match *self {}` is exhaustive
    let body = if variants.is_empty() {
        quote! { match *self {} }
    } else {
        quote! {
            match self {
                #(#name_arms),*
            }
        }
    };

    let expanded = quote! {
        impl #impl_generics ::unidirect::Action for #name #ty_generics #where_clause {
            fn name(&self) -> &'static str {
                #body
            }
        }
    };

    expanded.into()
}
