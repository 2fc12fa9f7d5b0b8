use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::auth;
use log::{debug, info};

/// Sentinel label for a face that matched nothing in the catalog.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Maximum embedding distance still accepted as a match (strict less-than).
pub const MATCH_TOLERANCE: f64 = 0.41;

static ROLL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)$").expect("static pattern"));

/// Reference data for one enrolled person: a label plus one or more
/// embeddings captured at enrollment. Immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceIdentity {
    pub label: String,
    pub embeddings: Vec<Vec<f64>>,
}

/// Selects the subset of people eligible for one monitoring session:
/// labels carrying `prefix` followed by a roll number in `[start, end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub id: String,
    pub name: String,
    pub prefix: String,
    pub start: u32,
    pub end: u32,
}

impl Scope {
    pub fn matches(&self, label: &str) -> bool {
        let Some(rest) = label.strip_prefix(&self.prefix) else {
            return false;
        };

        ROLL_RE
            .captures(rest)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .is_some_and(|roll| (self.start..=self.end).contains(&roll))
    }
}

/// Euclidean distance between two embeddings. Mismatched lengths compare as
/// infinitely far apart so they can never satisfy the tolerance.
pub fn embedding_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }

    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Matches one observed embedding against the catalog.
///
/// The reference with the minimum distance wins, ties going to the first one
/// encountered; the match is accepted only below [`MATCH_TOLERANCE`], with
/// confidence `1 - distance`. Everything else is `("Unknown", 0.0)`.
pub fn classify(catalog: &[ReferenceIdentity], embedding: &[f64]) -> (String, f64) {
    let refs: SmallVec<[(&str, &[f64]); 32]> = catalog
        .iter()
        .flat_map(|id| {
            id.embeddings
                .iter()
                .map(move |e| (id.label.as_str(), e.as_slice()))
        })
        .collect();

    if refs.is_empty() {
        return (UNKNOWN_LABEL.to_owned(), 0.0);
    }

    let distances: Vec<f64> = refs
        .par_iter()
        .map(|(_, reference)| embedding_distance(reference, embedding))
        .collect();

    // Sequential argmin keeps the first-encountered minimum on ties.
    let mut best = 0;
    for (i, d) in distances.iter().enumerate().skip(1) {
        if *d < distances[best] {
            best = i;
        }
    }

    let min = distances[best];
    if min < MATCH_TOLERANCE {
        (refs[best].0.to_owned(), 1.0 - min)
    } else {
        (UNKNOWN_LABEL.to_owned(), 0.0)
    }
}

/// Drops catalog entries whose label is not on the roster.
pub fn restrict_to_roster(
    catalog: Vec<ReferenceIdentity>,
    roster: &[String],
) -> Vec<ReferenceIdentity> {
    let members: HashSet<&str> = roster.iter().map(String::as_str).collect();
    catalog
        .into_iter()
        .filter(|id| members.contains(id.label.as_str()))
        .collect()
}

type EncodingMap = BTreeMap<String, Vec<Vec<f64>>>;

/// Storage capability for reference data, selected at startup and injected
/// into the caller. Either a local JSON file or the backend web application.
pub enum EncodingStore {
    Json(JsonStore),
    Remote(RemoteStore),
}

impl EncodingStore {
    pub async fn get_encodings(&self, scope: &Scope) -> Result<Vec<ReferenceIdentity>> {
        match self {
            EncodingStore::Json(store) => store.get_encodings(scope).await,
            EncodingStore::Remote(store) => store.get_encodings(scope).await,
        }
    }

    pub async fn get_roster(&self, scope: &Scope) -> Result<Vec<String>> {
        match self {
            EncodingStore::Json(store) => store.get_roster(scope).await,
            EncodingStore::Remote(store) => store.get_roster(scope).await,
        }
    }
}

/// Reference data held in a local JSON file mapping label to embeddings.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load(&self) -> Result<EncodingMap> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading encodings file {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing encodings file {}", self.path.display()))
    }

    async fn get_encodings(&self, scope: &Scope) -> Result<Vec<ReferenceIdentity>> {
        let map = self.load().await?;
        let catalog = scoped_identities(map, scope);
        info!(
            "Loaded {} reference identities for scope '{}' from {}",
            catalog.len(),
            scope.id,
            self.path.display()
        );
        Ok(catalog)
    }

    async fn get_roster(&self, scope: &Scope) -> Result<Vec<String>> {
        let map = self.load().await?;
        Ok(map.into_keys().filter(|l| scope.matches(l)).collect())
    }
}

/// Reference data fetched from the backend web application over HTTP, with
/// HMAC-signed requests.
pub struct RemoteStore {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteStore {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn encodings_url(&self, scope: &Scope) -> String {
        format!("{}/api/encodings/{}", self.base_url, scope.id)
    }

    fn roster_url(&self, scope: &Scope) -> String {
        format!("{}/api/roster/{}", self.base_url, scope.id)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T> {
        debug!("Fetching {url}");
        let response = self
            .client
            .get(&url)
            .header(auth::API_KEY_HEADER, auth::compute_hmac(&url))
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("backend returned {} for {url}", response.status()));
        }

        response.json().await.with_context(|| format!("decoding {url}"))
    }

    async fn get_encodings(&self, scope: &Scope) -> Result<Vec<ReferenceIdentity>> {
        let map: EncodingMap = self.fetch_json(self.encodings_url(scope)).await?;
        let catalog = scoped_identities(map, scope);
        info!(
            "Loaded {} reference identities for scope '{}' from backend",
            catalog.len(),
            scope.id
        );
        Ok(catalog)
    }

    async fn get_roster(&self, scope: &Scope) -> Result<Vec<String>> {
        self.fetch_json(self.roster_url(scope)).await
    }
}

fn scoped_identities(map: EncodingMap, scope: &Scope) -> Vec<ReferenceIdentity> {
    map.into_iter()
        .filter(|(label, _)| scope.matches(label))
        .map(|(label, embeddings)| ReferenceIdentity { label, embeddings })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(label: &str, value: f64) -> ReferenceIdentity {
        ReferenceIdentity {
            label: label.to_owned(),
            embeddings: vec![vec![value]],
        }
    }

    fn scope() -> Scope {
        Scope {
            id: "aiml".to_owned(),
            name: "CSE AIML".to_owned(),
            prefix: "23CSEAIML".to_owned(),
            start: 1,
            end: 90,
        }
    }

    #[test]
    fn close_observation_matches_with_inverted_confidence() {
        let catalog = vec![one("A", 0.0)];
        let (label, confidence) = classify(&catalog, &[0.2]);
        assert_eq!(label, "A");
        assert!((confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn observation_beyond_tolerance_is_unknown() {
        let catalog = vec![one("A", 0.0)];
        let (label, confidence) = classify(&catalog, &[0.5]);
        assert_eq!(label, UNKNOWN_LABEL);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn empty_catalog_is_unknown() {
        let (label, confidence) = classify(&[], &[0.1, 0.2]);
        assert_eq!(label, UNKNOWN_LABEL);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn nearest_reference_wins() {
        let catalog = vec![one("far", 0.3), one("near", 0.05)];
        let (label, _) = classify(&catalog, &[0.0]);
        assert_eq!(label, "near");
    }

    #[test]
    fn ties_break_to_first_encountered() {
        let catalog = vec![one("A", 0.2), one("B", 0.2)];
        let (label, _) = classify(&catalog, &[0.0]);
        assert_eq!(label, "A");
    }

    #[test]
    fn accepted_confidence_stays_above_tolerance_complement() {
        let catalog = vec![one("A", 0.0)];
        for value in [0.0, 0.1, 0.25, 0.4] {
            let (label, confidence) = classify(&catalog, &[value]);
            assert_eq!(label, "A");
            assert!(confidence > 1.0 - MATCH_TOLERANCE - 1e-9);
            assert!(confidence <= 1.0);
        }
    }

    #[test]
    fn mismatched_embedding_lengths_never_match() {
        let catalog = vec![ReferenceIdentity {
            label: "A".to_owned(),
            embeddings: vec![vec![0.0, 0.0]],
        }];
        let (label, _) = classify(&catalog, &[0.0]);
        assert_eq!(label, UNKNOWN_LABEL);
    }

    #[test]
    fn scope_accepts_rolls_inside_range() {
        let scope = scope();
        assert!(scope.matches("23CSEAIML087"));
        assert!(scope.matches("23CSEAIML001"));
        assert!(!scope.matches("23CSEAIML095"));
        assert!(!scope.matches("24CSEAIML010"));
        assert!(!scope.matches("23CSEAIMLx1"));
        assert!(!scope.matches("23CSEAIML"));
    }

    #[test]
    fn roster_restriction_drops_non_members() {
        let catalog = vec![one("A", 0.0), one("B", 0.0)];
        let roster = vec!["A".to_owned()];
        let kept = restrict_to_roster(catalog, &roster);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "A");
    }
}
