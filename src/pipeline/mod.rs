//! Request pipeline stages for PDF-to-CSV extraction.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ dispatch ──▶ (gateway | shell) ──▶ reply     download
//! (validate,  (readiness    (WebSocket or       (summary)  (name check,
//!  stage)      predicate)    one-shot CLI)                  stream)
//! ```
//!
//! 1. [`upload`]   read the `pdf` multipart field, validate, write to disk
//! 2. [`dispatch`] pick a [`dispatch::Backend`] and switch once on failure
//! 3. [`gateway`]  one WebSocket exchange with the supervised gateway
//! 4. [`shell`]    one `sh -c` run of the agent CLI with captured output
//! 5. [`reply`]    clean the agent's reply for the response message
//! 6. [`download`] validate and resolve a CSV name
//! 7. [`cleanup`]  delayed removal of uploads and served files

pub mod cleanup;
pub mod dispatch;
pub mod download;
pub mod gateway;
pub mod reply;
pub mod shell;
pub mod upload;
