//! Core-name extraction for pattern statistics
//!
//! A registered name such as `（四川）成都市太极大药房连锁有限公司` carries a
//! region prefix and a corporate suffix around the part reviewers actually
//! recognise. Pattern statistics count tokens of that core only.

use super::partition::PROVINCES;

/// Corporate suffixes, stripped repeatedly from the end
const CORPORATE_SUFFIXES: &[&str] = &[
    "股份有限公司",
    "有限责任公司",
    "有限公司",
    "分公司",
    "公司",
    "集团",
    "连锁",
    "股份",
];

/// Suffixes that may follow a leading province name
const PROVINCE_SUFFIXES: &[&str] = &[
    "壮族自治区",
    "回族自治区",
    "维吾尔自治区",
    "特别行政区",
    "自治区",
    "省",
    "市",
];

/// Markers closing a leading city/district/county token
const LOCALITY_MARKERS: &[char] = &['市', '区', '县'];

/// Longest locality token (in chars, marker included) stripped from the front
const MAX_LOCALITY_CHARS: usize = 4;

/// Leading and trailing two-character tokens of a core name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTokens {
    pub prefix: String,
    pub suffix: String,
}

fn strip_brackets(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '（' | '(' | '【' | '[' => depth += 1,
            '）' | ')' | '】' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out
}

fn strip_corporate(mut core: &str) -> &str {
    loop {
        let next = CORPORATE_SUFFIXES
            .iter()
            .find_map(|s| core.strip_suffix(s).filter(|rest| !rest.is_empty()));
        match next {
            Some(rest) => core = rest,
            None => return core,
        }
    }
}

fn strip_province(core: &str) -> &str {
    for province in PROVINCES {
        if let Some(rest) = core.strip_prefix(province) {
            let rest = PROVINCE_SUFFIXES
                .iter()
                .find_map(|s| rest.strip_prefix(s))
                .unwrap_or(rest);
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    core
}

fn strip_locality(core: &str) -> &str {
    for (idx, (byte_pos, c)) in core.char_indices().enumerate() {
        if idx >= MAX_LOCALITY_CHARS {
            break;
        }
        // A single-char "locality" is more likely part of the brand
        if idx >= 1 && LOCALITY_MARKERS.contains(&c) {
            let rest = &core[byte_pos + c.len_utf8()..];
            if rest.chars().count() >= 2 {
                return rest;
            }
        }
    }
    core
}

/// Name with region and corporate tokens removed
pub fn core_name(full_name: &str) -> String {
    let cleaned = strip_brackets(full_name);
    let core = strip_corporate(&cleaned);
    let core = strip_province(core);
    let core = strip_locality(core);
    core.to_string()
}

/// First and last two characters of the core name
///
/// `None` when the core is shorter than two characters.
pub fn name_tokens(full_name: &str) -> Option<NameTokens> {
    let chars: Vec<char> = core_name(full_name).chars().collect();
    if chars.len() < 2 {
        return None;
    }
    Some(NameTokens {
        prefix: chars[..2].iter().collect(),
        suffix: chars[chars.len() - 2..].iter().collect(),
    })
}
