use darling::ast::NestedMeta;
use darling::FromMeta;
use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{parse_macro_input, FnArg, Ident, ItemFn, Pat, ReturnType, Type};

use crate::common::{api_crate_path, default_handler_ident, format_error_span, to_compile_error};

/// Options accepted by `#[task_fn(...)]`
#[derive(Debug, Default, FromMeta)]
struct TaskFnOptions {
    /// Registry name for the task
    #[darling(default)]
    name: Option<String>,
    /// Name of the generated handler type
    #[darling(default)]
    handler: Option<String>,
}

/// Implementation of the `#[task_fn]` attribute
pub(crate) fn task_fn_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let nested = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(nested) => nested,
        Err(e) => return TokenStream::from(darling::Error::from(e).write_errors()),
    };
    let options = match TaskFnOptions::from_list(&nested) {
        Ok(options) => options,
        Err(e) => return TokenStream::from(e.write_errors()),
    };

    let function = parse_macro_input!(item as ItemFn);
    match expand(options, &function) {
        Ok(tokens) => tokens.into(),
        Err(e) => to_compile_error(e),
    }
}

fn expand(options: TaskFnOptions, function: &ItemFn) -> syn::Result<TokenStream2> {
    let sig = &function.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "task functions cannot be generic",
        ));
    }
    if let Some(variadic) = &sig.variadic {
        return Err(syn::Error::new_spanned(variadic, "task functions cannot be variadic"));
    }

    let api = api_crate_path();
    let fn_ident = &sig.ident;
    let task_name = options
        .name
        .unwrap_or_else(|| fn_ident.to_string().trim_start_matches("r#").to_string());
    let handler = match options.handler {
        Some(handler) => syn::parse_str::<Ident>(&handler).map_err(|_| {
            syn::Error::new(Span::call_site(), format!("`{handler}` is not a valid type name"))
        })?,
        None => default_handler_ident(fn_ident),
    };

    let mut decodes = Vec::new();
    let mut arg_idents = Vec::new();
    for (index, input) in sig.inputs.iter().enumerate() {
        let typed = match input {
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "task functions must be free functions without `self`",
                ));
            }
            FnArg::Typed(typed) => typed,
        };
        if !matches!(*typed.pat, Pat::Ident(_) | Pat::Wild(_)) {
            return Err(syn::Error::new_spanned(
                &typed.pat,
                "task function parameters must be plain identifiers",
            ));
        }
        let ty = &typed.ty;
        let ident = Ident::new(&format!("__arg{index}"), Span::call_site());
        decodes.push(quote! {
            let #ident: #ty = #api::decode_arg(&args, #index)?;
        });
        arg_idents.push(ident);
    }
    let arity = arg_idents.len();

    let call = if sig.asyncness.is_some() {
        quote! { #fn_ident(#(#arg_idents),*).await }
    } else {
        quote! { #fn_ident(#(#arg_idents),*) }
    };
    let output = if returns_result(&sig.output) {
        quote! { let __value = #call?; }
    } else {
        quote! { let __value = #call; }
    };

    let signature = quote!(#sig).to_string();
    let vis = &function.vis;
    let doc = format!("Task handler generated for [`{fn_ident}`], registered as `{task_name}`.");

    if handler == *fn_ident {
        return Ok(format_error_span(
            &sig.ident,
            "handler type name must differ from the function name",
        ));
    }

    Ok(quote! {
        #function

        #[doc = #doc]
        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #handler;

        #[#api::__private::async_trait::async_trait]
        impl #api::TaskFn for #handler {
            fn name(&self) -> &str {
                #task_name
            }

            fn source(&self) -> #api::FunctionSource {
                #api::FunctionSource::new(#task_name).with_signature(#signature)
            }

            async fn call(
                &self,
                args: #api::Args,
            ) -> #api::__private::anyhow::Result<#api::__private::serde_json::Value> {
                #api::expect_arity(#task_name, &args, #arity)?;
                #(#decodes)*
                #output
                #api::encode_result(__value)
            }
        }
    })
}

/// Whether the declared return type is spelled `Result<..>` (any path ending
/// in `Result`, e.g. `anyhow::Result<T>` or `std::io::Result<T>`).
fn returns_result(output: &ReturnType) -> bool {
    match output {
        ReturnType::Default => false,
        ReturnType::Type(_, ty) => match ty.as_ref() {
            Type::Path(path) => path
                .path
                .segments
                .last()
                .map(|segment| segment.ident == "Result")
                .unwrap_or(false),
            _ => false,
        },
    }
}
