//! Integration tests for the `#[task_fn]` macro live under `tests/`.
