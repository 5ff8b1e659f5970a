//! 期望状态的内容摘要
//!
//! 摘要是发布去重的唯一依据，只能依赖语义内容：回源地址按
//! (角色, 协议, 地址, 权重) 排序，域名排序去重，不包含源站组/地址集合ID。

use serde::Serialize;
use release_core::ReleaseResult;
use sha2::{Digest, Sha256};

use crate::value_objects::{DesiredState, OriginEntry, OriginMode, OriginRole};

/// 摘要长度（十六进制字符数）
pub const CONTENT_HASH_LEN: usize = 64;

#[derive(Serialize)]
struct CanonicalOrigin<'a> {
    role: OriginRole,
    protocol: &'a str,
    address: &'a str,
    weight: u32,
    enabled: bool,
}

#[derive(Serialize)]
struct CanonicalState<'a> {
    line_group_id: i64,
    mode: &'static str,
    domains: Vec<String>,
    origins: Vec<CanonicalOrigin<'a>>,
    redirect_url: Option<&'a str>,
    status_code: Option<u16>,
}

fn canonical_origins(origins: &[OriginEntry]) -> Vec<CanonicalOrigin<'_>> {
    let mut sorted: Vec<CanonicalOrigin<'_>> = origins
        .iter()
        .map(|o| CanonicalOrigin {
            role: o.role,
            protocol: o.protocol.as_str(),
            address: o.address.as_str(),
            weight: o.weight,
            enabled: o.enabled,
        })
        .collect();
    sorted.sort_by(|a, b| {
        (a.role, a.protocol, a.address, a.weight, a.enabled)
            .cmp(&(b.role, b.protocol, b.address, b.weight, b.enabled))
    });
    sorted
}

fn canonical_domains(domains: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = domains
        .iter()
        .map(|d| d.trim().to_ascii_lowercase())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// 计算期望状态的确定性摘要（SHA-256 十六进制）
pub fn content_hash(state: &DesiredState) -> ReleaseResult<String> {
    let (redirect_url, status_code) = match &state.mode {
        OriginMode::Redirect {
            redirect_url,
            status_code,
        } => (Some(redirect_url.as_str()), Some(*status_code)),
        _ => (None, None),
    };

    let canonical = CanonicalState {
        line_group_id: state.line_group_id,
        mode: state.mode.name(),
        domains: canonical_domains(&state.domains),
        origins: canonical_origins(state.mode.origins()),
        redirect_url,
        status_code,
    };

    // 结构体字段顺序固定，serde_json 输出即为规范形式
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TargetType;

    fn hash(state: &DesiredState) -> String {
        content_hash(state).unwrap()
    }

    fn origin(address: &str, role: OriginRole, weight: u32) -> OriginEntry {
        OriginEntry {
            address: address.to_string(),
            role,
            protocol: "https".to_string(),
            weight,
            enabled: true,
        }
    }

    fn group_state(origin_set_id: i64, origins: Vec<OriginEntry>) -> DesiredState {
        DesiredState {
            target_type: TargetType::Website,
            target_id: 1,
            line_group_id: 3,
            domains: vec!["a.example.com".to_string(), "b.example.com".to_string()],
            mode: OriginMode::Group {
                origin_group_id: 11,
                origin_set_id,
                origins,
            },
        }
    }

    #[test]
    fn test_hash_is_fixed_length_hex() {
        let hash = hash(&group_state(1, vec![]));
        assert_eq!(hash.len(), CONTENT_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_ignores_origin_order() {
        let a = origin("10.0.0.1:443", OriginRole::Primary, 10);
        let b = origin("10.0.0.2:443", OriginRole::Backup, 5);
        let first = hash(&group_state(1, vec![a.clone(), b.clone()]));
        let second = hash(&group_state(1, vec![b, a]));
        assert_eq!(first, second);
    }

    #[test]
    fn test_hash_ignores_origin_set_id() {
        let origins = vec![origin("10.0.0.1:443", OriginRole::Primary, 10)];
        assert_eq!(
            hash(&group_state(1, origins.clone())),
            hash(&group_state(99, origins))
        );
    }

    #[test]
    fn test_hash_ignores_domain_order_and_case() {
        let mut reordered = group_state(1, vec![]);
        reordered.domains = vec!["B.example.com".to_string(), "a.example.com".to_string()];
        assert_eq!(hash(&group_state(1, vec![])), hash(&reordered));
    }

    #[test]
    fn test_hash_changes_with_semantic_content() {
        let base = hash(&group_state(
            1,
            vec![origin("10.0.0.1:443", OriginRole::Primary, 10)],
        ));
        let reweighted = hash(&group_state(
            1,
            vec![origin("10.0.0.1:443", OriginRole::Primary, 20)],
        ));
        assert_ne!(base, reweighted);

        let mut moved = group_state(1, vec![origin("10.0.0.1:443", OriginRole::Primary, 10)]);
        moved.line_group_id = 4;
        assert_ne!(base, hash(&moved));
    }

    #[test]
    fn test_hash_distinguishes_modes() {
        let origins = vec![origin("10.0.0.1:443", OriginRole::Primary, 10)];
        let group = group_state(1, origins.clone());
        let mut manual = group.clone();
        manual.mode = OriginMode::Manual {
            origin_set_id: 1,
            origins,
        };
        assert_ne!(hash(&group), hash(&manual));
    }
}
