//! Identity resolution: from an identifier and the way it was given to the
//! PIT nodes it denotes.
//!
//! A canonical ID (`hgid`) denotes at most one node. A URI may be shared by
//! any number of nodes.

use serde::{Deserialize, Serialize};

use crate::model::{tokens, Node, Value};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// How an endpoint was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdMethod {
    Hgid,
    Uri,
}

impl IdMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdMethod::Hgid => "hgid",
            IdMethod::Uri => "uri",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hgid" => Some(IdMethod::Hgid),
            "uri" => Some(IdMethod::Uri),
            _ => None,
        }
    }

    /// The PIT property that carries identifiers of this kind.
    pub fn property_key(&self) -> &'static str {
        match self {
            IdMethod::Hgid => tokens::pit::HGID,
            IdMethod::Uri => tokens::pit::URI,
        }
    }
}

impl std::fmt::Display for IdMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Uri` for anything that starts with `http://` or `https://`.
pub fn classify(identifier: &str) -> IdMethod {
    if identifier.starts_with("http://") || identifier.starts_with("https://") {
        IdMethod::Uri
    } else {
        IdMethod::Hgid
    }
}

/// Qualify a bare canonical-ID fragment with its source: `"123"` from
/// `tgn` becomes `"tgn/123"`. Qualified IDs and URIs are returned as given.
pub fn namespace(source: &str, identifier: &str) -> String {
    if classify(identifier) == IdMethod::Hgid && !identifier.contains('/') {
        format!("{source}/{identifier}")
    } else {
        identifier.to_owned()
    }
}

/// The identifier a node answers to under `method`.
pub fn identifier_of(node: &Node, method: IdMethod) -> Option<&str> {
    node.get_str(method.property_key())
}

/// Every PIT node denoted by `identifier`.
///
/// Fails with `Error::Integrity` if more than one node carries the same hgid.
pub async fn resolve<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    identifier: &str,
    method: IdMethod,
) -> Result<Vec<Node>> {
    let nodes = backend
        .nodes_by_property(tx, tokens::PIT_LABEL, method.property_key(), &Value::from(identifier))
        .await?;
    if method == IdMethod::Hgid && nodes.len() > 1 {
        return Err(Error::Integrity(format!(
            "{} nodes share hgid {identifier}",
            nodes.len()
        )));
    }
    Ok(nodes)
}

/// Resolve a canonical ID to its single node, if any.
pub async fn resolve_hgid<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    hgid: &str,
) -> Result<Option<Node>> {
    Ok(resolve(backend, tx, hgid, IdMethod::Hgid).await?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("http://sws.geonames.org/2759794/"), IdMethod::Uri);
        assert_eq!(classify("https://example.org/a"), IdMethod::Uri);
        assert_eq!(classify("tgn/7006952"), IdMethod::Hgid);
        assert_eq!(classify("7006952"), IdMethod::Hgid);
        assert_eq!(classify("ftp://example.org"), IdMethod::Hgid);
    }

    #[test]
    fn test_namespace() {
        assert_eq!(namespace("tgn", "7006952"), "tgn/7006952");
        assert_eq!(namespace("tgn", "geonames/2759794"), "geonames/2759794");
        assert_eq!(namespace("tgn", "http://example.org/x"), "http://example.org/x");
    }

    #[test]
    fn test_id_method_serde() {
        assert_eq!(serde_json::to_string(&IdMethod::Uri).unwrap(), "\"uri\"");
        let m: IdMethod = serde_json::from_str("\"hgid\"").unwrap();
        assert_eq!(m, IdMethod::Hgid);
        assert_eq!(IdMethod::parse("uri"), Some(IdMethod::Uri));
        assert_eq!(IdMethod::parse("name"), None);
    }

    proptest! {
        #[test]
        fn namespaced_fragments_keep_their_suffix(
            source in "[a-z]{1,8}",
            local in "[A-Za-z0-9_.-]{1,16}",
        ) {
            let hgid = namespace(&source, &local);
            prop_assert_eq!(&hgid, &format!("{source}/{local}"));
            // Namespacing is idempotent once qualified.
            prop_assert_eq!(namespace(&source, &hgid), hgid);
        }
    }
}
