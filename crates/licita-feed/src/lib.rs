//! Atom page parsing and per-entry field extraction for procurement notices.
//!
//! A fetched page is parsed into a small namespace-aware element tree
//! ([`xml::Element`]); entries are mined through a declarative table of
//! namespace-qualified paths ([`extract::FIELD_TABLE`]) with per-field
//! defaults.

pub mod extract;
pub mod ns;
pub mod xml;

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

pub use extract::{
    entry_id, entry_updated, extract_row, Column, ColumnKind, Extracted, FieldSpec, FIELD_TABLE,
};
pub use ns::{FieldPath, Namespaces, QualifiedName};
pub use xml::{parse_page, Element, FeedEntry, FeedPage};

pub const CRATE_NAME: &str = "licita-feed";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed document is not utf-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("malformed feed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed feed xml attribute: {0}")]
    Attribute(#[from] AttrError),
    #[error("malformed feed document: {0}")]
    Malformed(String),
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("entry is missing required element {0}")]
    MissingRequired(&'static str),
    #[error("entry {id:?} has unparsable updated timestamp {value:?}")]
    BadTimestamp {
        id: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
