//! Content digesting of build requests.
//!
//! Two build requests are "the same executable" exactly when their digests
//! match. To make that stable, the digest is computed over an explicit
//! canonical form (keys sorted lexicographically at every level, compact
//! separators) with the relocation fields (`project`, `folder`, `parents`)
//! and the embedded source stripped, so moving an object or re-encoding
//! its source never changes its identity.

use itertools::Itertools;
use serde_json::{Value as Json, json};
use sha2::{Digest, Sha256};

/// The property key carrying the digest on every built object; the object
/// directory queries by presence of this key.
pub const CHECKSUM_PROPERTY: &str = "dxforge_checksum";

/// The `details` key the digest is embedded under.
pub const DETAILS_CHECKSUM_KEY: &str = "checksum";

/// The `details` key the compiler version is embedded under.
pub const DETAILS_VERSION_KEY: &str = "version";

/// The `details` key the embedded source lives under (excluded from the
/// digest).
pub const DETAILS_SOURCE_KEY: &str = "sourceCode";

/// The compiler version embedded into every built object.
pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fields that merely position the executable and never affect identity.
const RELOCATION_FIELDS: &[&str] = &["project", "folder", "parents"];

/// Rebuilds a JSON value with object keys sorted at every level.
fn canonicalize(json: &Json) -> Json {
    match json {
        Json::Object(object) => Json::Object(
            object
                .iter()
                .sorted_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(key, value)| (key.clone(), canonicalize(value)))
                .collect(),
        ),
        Json::Array(items) => Json::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// The canonical serialized form of a request: sorted keys, no whitespace.
pub fn canonical(json: &Json) -> String {
    canonicalize(json).to_string()
}

fn digestible(request: &Json) -> Json {
    let mut stripped = request.clone();

    if let Json::Object(object) = &mut stripped {
        for field in RELOCATION_FIELDS {
            object.remove(*field);
        }
        if let Some(Json::Object(details)) = object.get_mut("details") {
            details.remove(DETAILS_SOURCE_KEY);
        }
    }

    stripped
}

/// Digests a build request and embeds the result.
///
/// Returns the request with `details.checksum`, `details.version`, and the
/// [`CHECKSUM_PROPERTY`] property filled in, together with the hex digest
/// itself.
pub fn digest_request(request: &Json) -> (Json, String) {
    let digest = hex(Sha256::digest(canonical(&digestible(request))));

    let mut embedded = request.clone();
    if let Json::Object(object) = &mut embedded {
        let details = object
            .entry("details")
            .or_insert_with(|| json!({}));
        if let Json::Object(details) = details {
            details.insert(DETAILS_CHECKSUM_KEY.into(), json!(digest));
            details.insert(DETAILS_VERSION_KEY.into(), json!(COMPILER_VERSION));
        }

        let properties = object
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Json::Object(properties) = properties {
            properties.insert(CHECKSUM_PROPERTY.into(), json!(digest));
        }
    }

    (embedded, digest)
}

fn hex(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}
