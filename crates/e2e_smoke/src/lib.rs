//! End-to-end tests for the Kai gateway live under `tests/`.
