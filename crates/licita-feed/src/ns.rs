use std::collections::BTreeMap;

use crate::FeedError;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const CBC_NS: &str = "urn:dgpe:names:draft:codice:schema:xsd:CommonBasicComponents-2";
pub const CAC_NS: &str = "urn:dgpe:names:draft:codice:schema:xsd:CommonAggregateComponents-2";
pub const CBC_PLACE_EXT_NS: &str =
    "urn:dgpe:names:draft:codice-place-ext:schema:xsd:CommonBasicComponents-2";
pub const CAC_PLACE_EXT_NS: &str =
    "urn:dgpe:names:draft:codice-place-ext:schema:xsd:CommonAggregateComponents-2";

/// Prefix-to-URI bindings used to resolve field paths.
///
/// Unprefixed path steps resolve to the default namespace, which is Atom
/// unless the page declares otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    default: Option<String>,
    prefixes: BTreeMap<String, String>,
}

impl Namespaces {
    pub fn empty() -> Self {
        Self {
            default: None,
            prefixes: BTreeMap::new(),
        }
    }

    /// Bindings for the Atom envelope and the CODICE extension vocabularies.
    pub fn well_known() -> Self {
        let mut ns = Self::empty().with_default(ATOM_NS);
        for (prefix, uri) in [
            ("atom", ATOM_NS),
            ("cbc", CBC_NS),
            ("cac", CAC_NS),
            ("cbc-place-ext", CBC_PLACE_EXT_NS),
            ("cac-place-ext", CAC_PLACE_EXT_NS),
        ] {
            ns = ns.with_prefix(prefix, uri);
        }
        ns
    }

    pub fn with_default(mut self, uri: impl Into<String>) -> Self {
        self.default = Some(uri.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.prefixes.insert(prefix.into(), uri.into());
        self
    }

    /// Layer declarations found on a document over these bindings.
    pub fn overlay<'a>(&self, decls: impl IntoIterator<Item = &'a (Option<String>, String)>) -> Self {
        let mut merged = self.clone();
        for (prefix, uri) in decls {
            match prefix {
                Some(prefix) => {
                    merged.prefixes.insert(prefix.clone(), uri.clone());
                }
                None => merged.default = Some(uri.clone()),
            }
        }
        merged
    }

    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        match prefix {
            Some(prefix) => self.prefixes.get(prefix).map(String::as_str),
            None => self.default.as_deref(),
        }
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::well_known()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QualifiedName {
    fn parse(step: &str) -> Option<Self> {
        let (prefix, local) = match step.split_once(':') {
            Some((prefix, local)) => (Some(prefix.to_string()), local),
            None => (None, step),
        };
        if local.is_empty() || prefix.as_deref() == Some("") {
            return None;
        }
        Some(Self {
            prefix,
            local: local.to_string(),
        })
    }
}

/// A restricted ElementPath: an optional `.//` (any descendant) prefix
/// followed by `/`-separated child steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub descendant: bool,
    pub steps: Vec<QualifiedName>,
}

impl FieldPath {
    pub fn parse(expr: &str) -> Result<Self, FeedError> {
        let invalid = |reason: &str| FeedError::InvalidPath {
            path: expr.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = expr.trim();
        let (descendant, rest) = match trimmed.strip_prefix(".//") {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix("./").unwrap_or(trimmed)),
        };
        if rest.is_empty() {
            return Err(invalid("no steps"));
        }
        let steps = rest
            .split('/')
            .map(|step| QualifiedName::parse(step).ok_or_else(|| invalid("empty step")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { descendant, steps })
    }
}
