//! Cache key construction.
//!
//! Keys are `opsconductor:{namespace}:{hex}` where `hex` is the SHA-256 of
//! `namespace || canonicalized inputs`, truncated to 128 bits. The
//! canonicalization rules here are shared with Stage A's cache lookup, so a
//! rephrased-but-equivalent request hits the same entry.

use oc_domain::artifact::Entity;
use oc_domain::error::Stage;
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "opsconductor";

/// Cache namespaces. `Pending` holds awaiting-approval artifacts and is not
/// part of the stage hit/miss accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    StageA,
    StageB,
    StageC,
    Asset,
    Tool,
    Pending,
}

/// All namespaces that participate in stats reporting.
pub const STAT_NAMESPACES: &[Namespace] = &[
    Namespace::StageA,
    Namespace::StageB,
    Namespace::StageC,
    Namespace::Asset,
    Namespace::Tool,
];

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::StageA => "stage_a",
            Namespace::StageB => "stage_b",
            Namespace::StageC => "stage_c",
            Namespace::Asset => "asset",
            Namespace::Tool => "tool",
            Namespace::Pending => "pending",
        }
    }

    /// The full key prefix for this namespace, e.g. `opsconductor:stage_a:`.
    pub fn prefix(&self) -> String {
        format!("{KEY_PREFIX}:{}:", self.as_str())
    }

    pub fn for_stage(stage: Stage) -> Option<Namespace> {
        match stage {
            Stage::Classify => Some(Namespace::StageA),
            Stage::Select => Some(Namespace::StageB),
            Stage::Plan => Some(Namespace::StageC),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Namespace> {
        match s {
            "stage_a" => Some(Namespace::StageA),
            "stage_b" => Some(Namespace::StageB),
            "stage_c" => Some(Namespace::StageC),
            "asset" => Some(Namespace::Asset),
            "tool" => Some(Namespace::Tool),
            "pending" => Some(Namespace::Pending),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonicalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Canonicalize free text for keying: lowercase, collapse whitespace, strip
/// leading/trailing punctuation on each token (intra-word punctuation like
/// `web-prod-01` survives), drop trailing question marks.
pub fn canonicalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let tokens: Vec<String> = lowered
        .split_whitespace()
        .map(|tok| {
            tok.trim_matches(|c: char| c.is_ascii_punctuation())
                .to_string()
        })
        .filter(|tok| !tok.is_empty())
        .collect();
    tokens.join(" ")
}

/// Canonicalize an entity list: sorted by (type, value), normalized value
/// preferred.
pub fn canonicalize_entities(entities: &[Entity]) -> String {
    let mut pairs: Vec<(String, String)> = entities
        .iter()
        .map(|e| {
            let value = e
                .normalized_value
                .clone()
                .unwrap_or_else(|| e.value.to_lowercase());
            (e.entity_type.clone(), value)
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(t, v)| format!("{t}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Canonicalize a tool list: sorted names.
pub fn canonicalize_tools<S: AsRef<str>>(names: &[S]) -> String {
    let mut sorted: Vec<&str> = names.iter().map(|s| s.as_ref()).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Build the full cache key for canonicalized inputs.
pub fn cache_key(namespace: Namespace, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_str().as_bytes());
    hasher.update(b"\x00");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    // First 128 bits of the digest keeps keys short without collisions
    // mattering at cache scale.
    format!("{}{}", namespace.prefix(), hex::encode(&digest[..16]))
}

/// Key for an awaiting-approval record.
pub fn pending_key(request_id: &str) -> String {
    format!("{}{request_id}", Namespace::Pending.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_canonicalization_examples() {
        assert_eq!(
            canonicalize_text("  List ALL   servers in production?  "),
            "list all servers in production"
        );
        assert_eq!(
            canonicalize_text("Restart nginx on web-prod-01!"),
            "restart nginx on web-prod-01"
        );
        assert_eq!(canonicalize_text("???"), "");
    }

    #[test]
    fn equivalent_texts_share_a_key() {
        let a = cache_key(Namespace::StageA, &canonicalize_text("list servers?"));
        let b = cache_key(Namespace::StageA, &canonicalize_text("List  servers"));
        assert_eq!(a, b);
    }

    #[test]
    fn namespaces_never_collide() {
        let a = cache_key(Namespace::StageA, "same");
        let c = cache_key(Namespace::StageC, "same");
        assert_ne!(a, c);
        assert!(a.starts_with("opsconductor:stage_a:"));
        assert!(c.starts_with("opsconductor:stage_c:"));
    }

    #[test]
    fn key_hex_is_128_bits() {
        let key = cache_key(Namespace::Tool, "x");
        let hex_part = key.rsplit(':').next().unwrap();
        assert_eq!(hex_part.len(), 32);
    }

    #[test]
    fn entities_sorted_and_normalized() {
        let entities = vec![
            Entity {
                entity_type: "service".into(),
                value: "Nginx".into(),
                confidence: 0.9,
                normalized_value: None,
            },
            Entity {
                entity_type: "environment".into(),
                value: "Prod".into(),
                confidence: 0.9,
                normalized_value: Some("production".into()),
            },
        ];
        assert_eq!(
            canonicalize_entities(&entities),
            "environment=production;service=nginx"
        );
    }

    #[test]
    fn tools_sorted() {
        assert_eq!(
            canonicalize_tools(&["service_restart", "asset_query"]),
            "asset_query,service_restart"
        );
    }

    #[test]
    fn pending_keys_are_addressable_by_request_id() {
        assert_eq!(
            pending_key("req-1"),
            "opsconductor:pending:req-1"
        );
    }

    #[test]
    fn namespace_parse_round_trip() {
        for ns in STAT_NAMESPACES {
            assert_eq!(Namespace::parse(ns.as_str()), Some(*ns));
        }
        assert_eq!(Namespace::parse("bogus"), None);
    }
}
