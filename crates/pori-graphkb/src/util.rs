//! Small helpers shared by the connection and the matching code

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use md5::{Digest, Md5};
use pori_common::Record;
use serde_json::Value;
use std::collections::HashMap;

/// Cache key for a query body: md5 of its JSON with keys sorted
pub fn cache_key(body: &Value) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonical(body).to_string().as_bytes());
    let digest = hasher.finalize();
    const_hex::encode(&digest[..])
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Join an API base url and an endpoint with exactly one slash
pub fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// `exp` claim of a JWT, without verifying the signature
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp").and_then(|exp| {
        exp.as_i64()
            .or_else(|| exp.as_f64().map(|f| f as i64))
    })
}

/// Strip a trailing numeric version (`NM_005228.3` -> `NM_005228`)
pub fn strip_version(name: &str) -> (&str, Option<&str>) {
    if let Some((base, version)) = name.rsplit_once('.')
        && !base.is_empty()
        && !version.is_empty()
        && version.bytes().all(|b| b.is_ascii_digit())
    {
        return (base, Some(version));
    }
    (name, None)
}

/// Strip the `#` from a rid for use in a url path
pub fn rid_path(rid: &str) -> &str {
    rid.trim_start_matches('#')
}

/// Sort key for choosing between equivalent ontology terms, lowest first
///
/// Prefers terms with a real name, not deprecated, not an alias, without a
/// dependency, and from a higher ranked source. `sources_sort` maps a source
/// rid to its rank and falls back on the `sort` of an embedded source.
pub fn ontology_preference_key<'a>(
    record: &'a Record,
    sources_sort: &HashMap<String, i64>,
) -> (bool, bool, bool, bool, i64, &'a str, &'a str, &'a str) {
    let source_sort = record
        .source
        .as_ref()
        .map(|source| {
            sources_sort
                .get(source.rid())
                .copied()
                .or_else(|| source.record().map(Record::sort))
                .unwrap_or(99999)
        })
        .unwrap_or(99999);
    let name = record.name.as_deref().unwrap_or("");
    let source_id = record.source_id.as_deref().unwrap_or("");
    (
        record.name.is_some() && record.name == record.source_id,
        record.deprecated,
        record.alias,
        record.dependency.is_some(),
        source_sort,
        source_id,
        record.source_id_version.as_deref().unwrap_or(""),
        name,
    )
}
