//! Workspace root. See the `axon` crate for the public surface; the
//! integration tests in `tests/` drive full runs against the in-memory
//! engine port.
