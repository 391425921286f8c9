use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rolodex::{CandidateContact, StaticRunStore};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::commands::output::{OutputFormat, print_overlap};
use crate::commands::shared::build_service;
use crate::config::Config;

pub(crate) async fn handle_overlap(
    file: &Path,
    run: Option<&str>,
    max_lookups: Option<usize>,
    output: OutputFormat,
    config: &Config,
    db: Arc<DatabaseConnection>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| format!("Cannot read {}: {}", file.display(), e))?;

    let mut options = config.overlap_options();
    if max_lookups.is_some() {
        options.max_lookups = max_lookups;
    }
    let service = build_service(config, db, cancel, None)?.with_overlap_options(options);

    let result = match run {
        Some(run_id) => {
            let store = parse_runs(&contents)?;
            service.check_run_overlap(&store, run_id).await?
        }
        None => {
            let candidates = parse_candidates(&contents)?;
            service.check_overlap(&candidates).await?
        }
    };

    print_overlap(&result, output);
    Ok(())
}

fn parse_candidates(contents: &str) -> Result<Vec<CandidateContact>, String> {
    serde_json::from_str(contents)
        .map_err(|e| format!("Expected a JSON array of candidate contacts: {}", e))
}

fn parse_runs(contents: &str) -> Result<StaticRunStore, String> {
    let runs: HashMap<String, Vec<CandidateContact>> = serde_json::from_str(contents)
        .map_err(|e| format!("Expected a JSON object of enrichment runs: {}", e))?;
    Ok(runs
        .into_iter()
        .fold(StaticRunStore::new(), |store, (id, contacts)| {
            store.with_run(id, contacts)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex::EnrichmentRunStore;

    #[test]
    fn test_parse_candidates_accepts_camel_case_names() {
        let candidates = parse_candidates(
            r#"[{"email": "ada@example.com", "firstName": "Ada"}, {"first_name": "Bo"}]"#,
        )
        .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].first_name.as_deref(), Some("Ada"));
        assert_eq!(candidates[1].email, None);
    }

    #[test]
    fn test_parse_candidates_rejects_objects() {
        assert!(parse_candidates(r#"{"run": []}"#).is_err());
    }

    #[tokio::test]
    async fn test_parse_runs() {
        let store = parse_runs(r#"{"run-1": [{"email": "ada@example.com"}], "run-2": []}"#).unwrap();
        assert_eq!(store.candidates("run-1").await.unwrap().len(), 1);
        assert!(store.candidates("run-2").await.unwrap().is_empty());
        assert!(store.candidates("run-3").await.is_err());
    }
}
