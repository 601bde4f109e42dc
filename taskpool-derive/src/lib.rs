use proc_macro::TokenStream;

mod common;
mod task;

/// Turns a free function into a registrable task function.
///
/// The annotated function is kept as written. Next to it the macro generates
/// a unit struct implementing `taskpool_api::TaskFn` that decodes the
/// positional JSON arguments, calls the function (awaiting it if it is
/// `async`) and encodes the return value.
///
/// # Requirements
///
/// - Every parameter type implements `serde::de::DeserializeOwned`.
/// - The return type is either `T` or `Result<T, E>` where `T: Serialize`
///   and `E` converts into `anyhow::Error`.
/// - No `self` receiver and no generic parameters.
///
/// # Options
///
/// - `name = "..."`: registry name (defaults to the function name)
/// - `handler = "..."`: generated type name (defaults to the function name
///   in PascalCase followed by `Task`)
///
/// # Example
///
/// ```rust,ignore
/// use taskpool_api::{task_fn, TaskFn};
///
/// #[task_fn(name = "math.add")]
/// async fn add(a: i64, b: i64) -> anyhow::Result<i64> {
///     Ok(a + b)
/// }
///
/// assert_eq!(AddTask.name(), "math.add");
/// ```
#[proc_macro_attribute]
pub fn task_fn(attr: TokenStream, item: TokenStream) -> TokenStream {
    task::task_fn_impl(attr, item)
}
