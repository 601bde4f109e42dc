//! `#[task_fn]` used through `taskpool` alone; tests live under `tests/`.
