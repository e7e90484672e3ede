//! Pipeline stages for spreadsheet-to-document merging.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own with in-memory inputs.
//!
//! ## Data Flow
//!
//! ```text
//! data ──▶ extract ──▶ derive ──▶ render ──▶ convert
//! (xlsx/csv) (records)  (rules)   (docx)    (soffice)
//! ```
//!
//! 1. [`extract`]   - read one sheet into ordered [`crate::record::Record`]s
//! 2. [`derive`]    - add rule-computed fields to every record
//! 3. [`template`]  - open the DOCX package and locate the repeating block
//! 4. [`render`]    - instantiate the block per record, with page breaks;
//!    CPU-bound, run in `spawn_blocking`
//! 5. [`convert`]   - optional external conversion, awaited under a timeout
//!
//! [`placeholder`] is the tag scanner shared by `derive` and `render`, and
//! [`workspace`] holds each job's private directory.

pub mod convert;
pub mod derive;
pub mod extract;
pub mod placeholder;
pub mod render;
pub mod template;
pub mod workspace;
