// Raw provider records -> ParsedJob. Derivation is deterministic; a
// record without an external id has no identity and is dropped, which is
// the only drop path. Anything else degrades to a low-confidence minimal
// representation instead of failing the batch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::client::RawRecord;
use crate::models::job::{ParsedJob, SalaryRange};

pub const SOURCE: &str = "jsearch";

const FULL_CONFIDENCE: i32 = 95;
const FALLBACK_CONFIDENCE: i32 = 50;

/// Description cap for the minimal fallback representation.
const FALLBACK_DESCRIPTION_CHARS: usize = 2000;

const MAX_REQUIREMENTS: usize = 20;

/// Skills scanned for in the description to build the preferred list.
const COMMON_SKILLS: [&str; 20] = [
    "javascript",
    "typescript",
    "python",
    "java",
    "c++",
    "react",
    "angular",
    "vue",
    "node.js",
    "express",
    "mongodb",
    "sql",
    "docker",
    "kubernetes",
    "aws",
    "gcp",
    "azure",
    "git",
    "rest api",
    "graphql",
];

/// Parse a batch, dropping identity-less records and collapsing repeated
/// external ids to their first occurrence.
pub fn parse_batch(records: &[RawRecord], scraped_at: DateTime<Utc>) -> Vec<ParsedJob> {
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();
    for raw in records {
        if let Some(job) = parse_record(raw, scraped_at) {
            if seen.insert(job.external_id.clone()) {
                parsed.push(job);
            } else {
                tracing::debug!("batch already contains job {}", job.external_id);
            }
        }
    }
    parsed
}

/// Parse one raw record. Returns None only when the record carries no
/// external id.
pub fn parse_record(raw: &RawRecord, scraped_at: DateTime<Utc>) -> Option<ParsedJob> {
    let external_id = match raw.get("job_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            tracing::warn!(
                "dropping record with no job_id (title: {:?})",
                raw.get("job_title")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("")
            );
            return None;
        }
    };

    let title = raw.get("job_title").and_then(Value::as_str);
    let company = raw.get("employer_name").and_then(Value::as_str);

    let job = match (title, company) {
        (Some(title), Some(company)) => full_parse(raw, title, company, external_id, scraped_at),
        _ => fallback_parse(raw, external_id, scraped_at),
    };
    Some(job)
}

fn full_parse(
    raw: &RawRecord,
    title: &str,
    company: &str,
    external_id: String,
    scraped_at: DateTime<Utc>,
) -> ParsedJob {
    let description = raw
        .get("job_description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let location = extract_location(raw);
    let (requirements, preferred_skills) = extract_skills(raw, &description);

    ParsedJob {
        dedup_key: dedup_key(title, company, &location),
        title: title.to_string(),
        company: company.to_string(),
        location,
        salary: extract_salary(raw),
        description,
        requirements,
        preferred_skills,
        employment_type: raw
            .get("job_employment_type")
            .and_then(Value::as_str)
            .unwrap_or("FULLTIME")
            .to_string(),
        is_remote: raw
            .get("job_is_remote")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        apply_url: raw
            .get("job_apply_link")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        external_id,
        source: SOURCE.to_string(),
        scraped_at,
        extraction_confidence: FULL_CONFIDENCE,
        raw: raw.clone(),
    }
}

/// Minimal representation when the record is missing its title or
/// company: defaults in place of absent fields, description truncated,
/// low extraction confidence.
fn fallback_parse(raw: &RawRecord, external_id: String, scraped_at: DateTime<Utc>) -> ParsedJob {
    let title = raw
        .get("job_title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let company = raw
        .get("employer_name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let description: String = raw
        .get("job_description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .take(FALLBACK_DESCRIPTION_CHARS)
        .collect();
    let location = extract_location(raw);

    ParsedJob {
        dedup_key: dedup_key(title, company, &location),
        title: title.to_string(),
        company: company.to_string(),
        location,
        salary: None,
        description,
        requirements: Vec::new(),
        preferred_skills: Vec::new(),
        employment_type: "FULLTIME".to_string(),
        is_remote: false,
        apply_url: raw
            .get("job_apply_link")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        external_id,
        source: SOURCE.to_string(),
        scraped_at,
        extraction_confidence: FALLBACK_CONFIDENCE,
        raw: raw.clone(),
    }
}

fn extract_location(raw: &RawRecord) -> String {
    let mut parts = Vec::new();
    for key in ["job_city", "job_state", "job_country"] {
        if let Some(part) = raw.get(key).and_then(Value::as_str)
            && !part.is_empty()
        {
            parts.push(part);
        }
    }
    if !parts.is_empty() {
        return parts.join(", ");
    }

    let description = raw
        .get("job_description")
        .and_then(Value::as_str)
        .unwrap_or("");
    if let Some(found) = scan_location(description) {
        return found;
    }

    if raw
        .get("job_is_remote")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        "Remote".to_string()
    } else {
        "Not specified".to_string()
    }
}

/// Case-insensitive scan for a "location:" marker in free text, taking
/// everything up to the next comma or newline.
fn scan_location(description: &str) -> Option<String> {
    let idx = find_ascii_ci(description, "location")?;
    let rest = &description[idx + "location".len()..];
    let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
    let candidate = rest.split(['\n', ',']).next().unwrap_or("").trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Byte offset of the first ASCII case-insensitive occurrence of
/// `needle`. An ASCII needle can only match ASCII bytes, so the returned
/// offset always sits on a char boundary.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn extract_salary(raw: &RawRecord) -> Option<SalaryRange> {
    let min = raw.get("job_min_salary").and_then(Value::as_f64);
    let max = raw.get("job_max_salary").and_then(Value::as_f64);
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(SalaryRange {
        min: min.map(|v| v as i64),
        max: max.map(|v| v as i64),
        currency: raw
            .get("job_salary_currency")
            .and_then(Value::as_str)
            .unwrap_or("USD")
            .to_string(),
        period: raw
            .get("job_salary_period")
            .and_then(Value::as_str)
            .unwrap_or("YEAR")
            .to_string(),
    })
}

fn extract_skills(raw: &RawRecord, description: &str) -> (Vec<String>, Vec<String>) {
    let requirements: Vec<String> = raw
        .get("job_required_skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .take(MAX_REQUIREMENTS)
                .collect()
        })
        .unwrap_or_default();

    let lower = description.to_lowercase();
    let preferred_skills = COMMON_SKILLS
        .iter()
        .filter(|skill| {
            lower.contains(*skill) && !requirements.iter().any(|r| r.eq_ignore_ascii_case(skill))
        })
        .map(|s| s.to_string())
        .collect();

    (requirements, preferred_skills)
}

/// Stable content hash over normalized title, company and location, used
/// to catch syndicated reposts carrying different external ids.
pub fn dedup_key(title: &str, company: &str, location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_fragment(title));
    hasher.update("|");
    hasher.update(normalize_fragment(company));
    hasher.update("|");
    hasher.update(normalize_fragment(location));
    hex::encode(hasher.finalize())
}

fn normalize_fragment(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn full_record() -> RawRecord {
        json!({
            "job_id": "abc-123",
            "job_title": "Senior Backend Engineer",
            "employer_name": "Acme Corp",
            "job_city": "Bangalore",
            "job_state": "Karnataka",
            "job_country": "IN",
            "job_min_salary": 1800000.0,
            "job_max_salary": 2600000.0,
            "job_salary_currency": "INR",
            "job_description": "We use Python and Docker daily. GraphQL a plus.",
            "job_required_skills": ["Python", "PostgreSQL"],
            "job_employment_type": "FULLTIME",
            "job_is_remote": false,
            "job_apply_link": "https://example.com/apply"
        })
    }

    #[test]
    fn full_record_parses_with_high_confidence() {
        let job = parse_record(&full_record(), Utc::now()).unwrap();

        assert_eq!(job.title, "Senior Backend Engineer");
        assert_eq!(job.company, "Acme Corp");
        assert_eq!(job.location, "Bangalore, Karnataka, IN");
        assert_eq!(job.extraction_confidence, 95);
        assert_eq!(job.external_id, "abc-123");
        assert_eq!(job.source, "jsearch");
        assert_eq!(job.requirements, vec!["Python", "PostgreSQL"]);

        let salary = job.salary.unwrap();
        assert_eq!(salary.min, Some(1_800_000));
        assert_eq!(salary.max, Some(2_600_000));
        assert_eq!(salary.currency, "INR");
        assert_eq!(salary.period, "YEAR");
    }

    #[test]
    fn missing_title_takes_fallback() {
        let raw = json!({
            "job_id": "no-title",
            "employer_name": "Acme Corp",
            "job_description": "x".repeat(5000)
        });
        let job = parse_record(&raw, Utc::now()).unwrap();

        assert_eq!(job.title, "Unknown");
        assert_eq!(job.company, "Acme Corp");
        assert_eq!(job.extraction_confidence, 50);
        assert_eq!(job.description.chars().count(), 2000);
        assert!(job.requirements.is_empty());
        assert!(job.salary.is_none());
    }

    #[test]
    fn record_without_id_is_dropped() {
        let raw = json!({ "job_title": "Ghost Job", "employer_name": "Acme" });
        assert!(parse_record(&raw, Utc::now()).is_none());
    }

    #[test]
    fn location_falls_back_to_description_scan() {
        let raw = json!({
            "job_id": "loc-1",
            "job_title": "Engineer",
            "employer_name": "Acme",
            "job_description": "Great role.\nLocation: Bangalore, India\nApply now."
        });
        let job = parse_record(&raw, Utc::now()).unwrap();
        assert_eq!(job.location, "Bangalore");
    }

    #[test]
    fn location_defaults_by_remote_flag() {
        let remote = json!({
            "job_id": "loc-2",
            "job_title": "Engineer",
            "employer_name": "Acme",
            "job_is_remote": true
        });
        assert_eq!(parse_record(&remote, Utc::now()).unwrap().location, "Remote");

        let onsite = json!({
            "job_id": "loc-3",
            "job_title": "Engineer",
            "employer_name": "Acme"
        });
        assert_eq!(
            parse_record(&onsite, Utc::now()).unwrap().location,
            "Not specified"
        );
    }

    #[test]
    fn salary_keeps_one_sided_bounds() {
        let raw = json!({
            "job_id": "sal-1",
            "job_title": "Engineer",
            "employer_name": "Acme",
            "job_min_salary": 90000.0
        });
        let salary = parse_record(&raw, Utc::now()).unwrap().salary.unwrap();
        assert_eq!(salary.min, Some(90_000));
        assert_eq!(salary.max, None);
        assert_eq!(salary.currency, "USD");
        assert_eq!(salary.period, "YEAR");

        let raw = json!({ "job_id": "sal-2", "job_title": "Engineer", "employer_name": "Acme" });
        assert!(parse_record(&raw, Utc::now()).unwrap().salary.is_none());
    }

    #[test]
    fn preferred_skills_exclude_requirements() {
        let job = parse_record(&full_record(), Utc::now()).unwrap();
        assert!(job.preferred_skills.contains(&"docker".to_string()));
        assert!(job.preferred_skills.contains(&"graphql".to_string()));
        // already a requirement, case-insensitively
        assert!(!job.preferred_skills.contains(&"python".to_string()));
    }

    #[test]
    fn dedup_key_ignores_case_and_spacing() {
        let a = dedup_key("Senior  Engineer", "Acme Corp", "Bangalore, India");
        let b = dedup_key("senior engineer", "ACME CORP", "bangalore,  india");
        assert_eq!(a, b);

        let c = dedup_key("Staff Engineer", "Acme Corp", "Bangalore, India");
        assert_ne!(a, c);
    }

    #[test]
    fn batch_collapses_duplicate_external_ids() {
        let records = vec![full_record(), full_record()];
        let parsed = parse_batch(&records, Utc::now());
        assert_eq!(parsed.len(), 1);
    }
}
