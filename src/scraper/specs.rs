use crate::client::SearchSpec;

/// Specs covered by the 3-hourly subset scrape (the first N of the
/// predefined list).
pub const SUBSET_LEN: usize = 5;

pub const COUNTRY: &str = "in";

/// The fixed search list every full scrape iterates, in order.
pub fn predefined() -> Vec<SearchSpec> {
    [
        "software engineer india bangalore",
        "data scientist machine learning india",
        "frontend developer react angular india",
        "backend developer python java india",
        "devops engineer kubernetes docker india",
        "full stack developer nodejs react india",
        "machine learning engineer tensorflow india",
        "project manager scrum agile india",
        "cloud engineer aws gcp azure india",
        "python developer django flask india",
    ]
    .into_iter()
    .map(|query| SearchSpec::new(query, COUNTRY))
    .collect()
}
