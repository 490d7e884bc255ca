//! Canonical opportunity records and the transform from raw upstream payloads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority marker for offline access.
///
/// Nothing in the upstream transform sets this; it exists so that callers
/// (or a future enrichment step) can flag records for the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
}

/// Agency hierarchy, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgencyHierarchy {
    pub department: Option<String>,
    pub sub_tier: Option<String>,
    pub office: Option<String>,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAside {
    pub code: String,
    pub description: Option<String>,
}

/// A contract opportunity in the shape every consumer sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub notice_id: String,
    pub title: String,
    pub solicitation_number: Option<String>,
    pub notice_type: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub response_deadline: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub agency: AgencyHierarchy,
    pub location: Option<Location>,
    pub naics_code: Option<String>,
    pub set_aside: Option<SetAside>,
    pub estimated_value: Option<f64>,
    pub ui_link: Option<String>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Importance>,
}

impl Opportunity {
    pub fn is_high_importance(&self) -> bool {
        self.importance == Some(Importance::High)
    }
}

/// One page of canonical results plus the upstream's total count.
///
/// An empty page is a valid, cacheable result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityPage {
    pub opportunities: Vec<Opportunity>,
    pub total: u64,
}

impl OpportunityPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
    }
}

// ============================================================================
// RAW UPSTREAM SHAPES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawOpportunity {
    notice_id: Option<String>,
    title: Option<String>,
    solicitation_number: Option<String>,
    full_parent_path_name: Option<String>,
    department: Option<String>,
    sub_tier: Option<String>,
    office: Option<String>,
    posted_date: Option<String>,
    #[serde(rename = "type")]
    notice_type: Option<String>,
    type_of_set_aside: Option<String>,
    type_of_set_aside_description: Option<String>,
    #[serde(rename = "responseDeadLine")]
    response_deadline: Option<String>,
    naics_code: Option<String>,
    active: Option<String>,
    award: Option<RawAward>,
    description: Option<String>,
    place_of_performance: Option<RawPlace>,
    ui_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAward {
    amount: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlace {
    city: Option<RawNamed>,
    state: Option<RawNamed>,
    zip: Option<String>,
    country: Option<RawNamed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNamed {
    code: Option<String>,
    name: Option<String>,
}

impl RawOpportunity {
    fn into_canonical(self) -> Option<Opportunity> {
        let notice_id = self.notice_id.filter(|id| !id.trim().is_empty())?;

        let path: Vec<String> = self
            .full_parent_path_name
            .as_deref()
            .map(|p| {
                p.split('.')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let agency = AgencyHierarchy {
            department: self.department.or_else(|| path.first().cloned()),
            sub_tier: self.sub_tier.or_else(|| path.get(1).cloned()),
            office: self.office.or_else(|| path.get(2).cloned()),
            path,
        };

        let location = self.place_of_performance.map(|place| Location {
            city: place.city.and_then(|c| c.name),
            state: place.state.and_then(|s| s.code.or(s.name)),
            zip: place.zip,
            country: place.country.and_then(|c| c.code.or(c.name)),
        });

        let set_aside = self.type_of_set_aside.filter(|c| !c.is_empty()).map(|code| SetAside {
            code,
            description: self.type_of_set_aside_description,
        });

        Some(Opportunity {
            notice_id,
            title: self.title.unwrap_or_else(|| "Untitled opportunity".to_string()),
            solicitation_number: self.solicitation_number.filter(|s| !s.is_empty()),
            notice_type: self.notice_type,
            posted_date: self.posted_date.as_deref().and_then(parse_posted_date),
            response_deadline: self.response_deadline.as_deref().and_then(parse_deadline),
            description: self.description.filter(|d| !d.is_empty()),
            agency,
            location,
            naics_code: self.naics_code.filter(|c| !c.is_empty()),
            set_aside,
            estimated_value: self.award.and_then(|a| a.amount).and_then(|v| amount_value(&v)),
            ui_link: self.ui_link,
            active: self
                .active
                .map(|a| a.eq_ignore_ascii_case("yes") || a.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            importance: None,
        })
    }
}

fn parse_posted_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn amount_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace([',', '$'], "").trim().parse().ok(),
        _ => None,
    }
}

/// Transform a raw upstream search body into a canonical page.
///
/// Tolerates every malformed shape the upstream has been seen to produce: a
/// missing or null `opportunitiesData`, a single object instead of an array,
/// individual records without a notice id (skipped), and a missing
/// `totalRecords` (falls back to the record count). Never fails; anything
/// unreadable yields an empty page.
pub fn transform_search_body(body: &Value) -> OpportunityPage {
    let records: Vec<Value> = match body.get("opportunitiesData") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(_)) => body.get("opportunitiesData").cloned().into_iter().collect(),
        _ => Vec::new(),
    };

    let opportunities: Vec<Opportunity> = records
        .into_iter()
        .filter_map(|record| serde_json::from_value::<RawOpportunity>(record).ok())
        .filter_map(RawOpportunity::into_canonical)
        .collect();

    let total = body
        .get("totalRecords")
        .and_then(|t| t.as_u64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(opportunities.len() as u64);

    OpportunityPage { opportunities, total }
}
