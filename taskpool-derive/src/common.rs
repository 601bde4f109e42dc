// Common utility functions shared by the task macros

use proc_macro2::{Span, TokenStream};
use proc_macro_crate::{crate_name, FoundCrate};
use quote::quote;
use syn::Ident;

/// Helper function for error handling in macros
pub fn format_error_span<T: quote::ToTokens>(
    item: &T,
    message: &str
) -> TokenStream {
    syn::Error::new_spanned(item, message)
        .to_compile_error()
}

/// Path through which generated code reaches the `taskpool_api` crate.
///
/// Callers that depend on `taskpool` alone get the copy it re-exports.
pub fn api_crate_path() -> TokenStream {
    match crate_name("taskpool-api") {
        // the api crate names itself with `extern crate self as taskpool_api`
        Ok(FoundCrate::Itself) => quote!(::taskpool_api),
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Err(_) => match crate_name("taskpool") {
            Ok(FoundCrate::Itself) => quote!(crate::__private::taskpool_api),
            Ok(FoundCrate::Name(name)) => {
                let ident = Ident::new(&name, Span::call_site());
                quote!(::#ident::__private::taskpool_api)
            }
            Err(_) => quote!(::taskpool_api),
        },
    }
}

/// Convert a syn::Error to a TokenStream that can be returned from a proc_macro function
pub fn to_compile_error(error: syn::Error) -> proc_macro::TokenStream {
    error.to_compile_error().into()
}

/// `snake_case` → `PascalCase`
pub fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Default name of the type generated for a task function.
pub fn default_handler_ident(fn_name: &Ident) -> Ident {
    let raw = fn_name.to_string();
    let trimmed = raw.trim_start_matches("r#");
    Ident::new(&format!("{}Task", pascal_case(trimmed)), Span::call_site())
}
