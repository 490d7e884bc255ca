//! Notice-type codes and per-type summaries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::opportunity::Opportunity;

/// Known single-letter notice codes with label and description.
const NOTICE_TYPES: &[(&str, &str, &str)] = &[
    ("o", "Opportunity", "Active contract opportunity open for bidding"),
    ("p", "Pre-solicitation", "Advance notice of a future contract opportunity"),
    ("k", "Combined Synopsis", "Combined synopsis and solicitation for commercial items"),
    ("r", "Sources Sought", "Market research to identify potential contractors"),
    ("g", "Surplus Property", "Notice of sale of government surplus property"),
    ("a", "Award Notice", "Announcement of contract award"),
    ("s", "Special Notice", "Special announcement or supplemental information"),
    ("i", "Intent to Bundle", "Notice of intent to bundle contract requirements"),
];

fn lookup(code: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    NOTICE_TYPES.iter().find(|(c, _, _)| c.eq_ignore_ascii_case(code))
}

/// Human-readable label for a notice code; unknown codes are returned as-is.
pub fn notice_type_label(code: &str) -> String {
    lookup(code).map(|(_, label, _)| label.to_string()).unwrap_or_else(|| code.to_string())
}

pub fn notice_type_description(code: &str) -> String {
    lookup(code).map(|(_, _, desc)| desc.to_string()).unwrap_or_else(|| code.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeTypeCount {
    pub label: String,
    pub description: String,
    pub count: u64,
}

/// Count opportunities per notice type, most frequent first.
///
/// Ties are ordered by label so the output is stable.
pub fn summarize_by_notice_type(opportunities: &[Opportunity]) -> Vec<NoticeTypeCount> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for opp in opportunities {
        let code = opp.notice_type.clone().unwrap_or_else(|| "Unknown".to_string());
        *counts.entry(code).or_default() += 1;
    }

    let mut summary: Vec<NoticeTypeCount> = counts
        .into_iter()
        .map(|(code, count)| NoticeTypeCount {
            label: notice_type_label(&code),
            description: notice_type_description(&code),
            count,
        })
        .collect();
    summary.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    summary
}
