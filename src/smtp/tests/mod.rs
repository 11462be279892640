//! Session-level tests driving [`Session`](super::Session) with in-memory
//! collaborators.

mod support;
