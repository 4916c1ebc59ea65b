use serde_json::Value;

/// Boundary-layer transform applied to listener options before persistence.
///
/// The original implementation merges a legacy `methods` field into the
/// canonical `ethCompatMethods` key and flags whether translation happened,
/// purely so older clients' listener option payloads keep working. This is
/// domain-specific translation, not core scheduling/ordering logic, so it is
/// preserved here only as the single boundary-layer function call the event
/// stream runtime makes before `write_listener` (see §9 Open Questions).
pub fn apply_eth_compat_methods(mut options: Value) -> Value {
    if let Value::Object(ref mut map) = options {
        if let Some(legacy) = map.remove("methods") {
            map.entry("ethCompatMethods").or_insert(legacy);
            map.insert("ethCompatMethodsTranslated".to_string(), Value::Bool(true));
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merges_legacy_methods_field() {
        let out = apply_eth_compat_methods(json!({ "methods": ["eth_getLogs"] }));
        assert_eq!(out["ethCompatMethods"], json!(["eth_getLogs"]));
        assert_eq!(out["ethCompatMethodsTranslated"], json!(true));
        assert!(out.get("methods").is_none());
    }

    #[test]
    fn leaves_canonical_payload_untouched() {
        let out = apply_eth_compat_methods(json!({ "ethCompatMethods": ["eth_getLogs"] }));
        assert_eq!(out["ethCompatMethods"], json!(["eth_getLogs"]));
        assert!(out.get("ethCompatMethodsTranslated").is_none());
    }
}
