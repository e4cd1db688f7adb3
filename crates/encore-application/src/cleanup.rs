// SPDX-License-Identifier: GPL-3.0-or-later

//! Detection and removal of duplicate artists such as `Artist (2)` that
//! import lists can leave behind in Lidarr.

use encore_domain::LibraryArtist;
use encore_infrastructure::ArtistRemover;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Artists sharing one name; `keep` survives, `remove` are deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub keep: LibraryArtist,
    pub remove: Vec<LibraryArtist>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupPlan {
    pub groups: Vec<DuplicateGroup>,
}

impl CleanupPlan {
    pub fn total_removals(&self) -> usize {
        self.groups.iter().map(|group| group.remove.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub planned: usize,
    pub removed: usize,
    pub failed: usize,
    pub dry_run: bool,
}

/// Name used to group artists: lowercase, quotes removed, single spaces and
/// no leading "the".
fn comparison_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}' | '\u{201e}'))
        .collect();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix("the ") {
        Some(rest) => rest.to_string(),
        None => collapsed,
    }
}

/// Splits `Artist (2)` into `("Artist", 2)`.
fn numbered_suffix(name: &str) -> Option<(&str, u32)> {
    lazy_static! {
        static ref NUMBERED: Regex =
            Regex::new(r"^(.+?)\s*\((\d+)\)$").expect("valid duplicate regex");
    }

    let captures = NUMBERED.captures(name.trim())?;
    let base = captures.get(1)?.as_str().trim();
    let number = captures.get(2)?.as_str().parse().ok()?;
    Some((base, number))
}

/// Plans which artists to delete.
///
/// A numbered artist is only a duplicate when its unnumbered original exists.
/// Artists whose names compare equal are also grouped; the lowest id is kept.
pub fn plan_duplicate_cleanup(artists: &[LibraryArtist]) -> CleanupPlan {
    let mut originals: BTreeMap<String, Vec<&LibraryArtist>> = BTreeMap::new();
    let mut numbered: BTreeMap<String, Vec<(u32, &LibraryArtist)>> = BTreeMap::new();

    for artist in artists.iter().filter(|artist| !artist.name.trim().is_empty()) {
        match numbered_suffix(&artist.name) {
            Some((base, number)) => numbered
                .entry(comparison_name(base))
                .or_default()
                .push((number, artist)),
            None => originals
                .entry(comparison_name(&artist.name))
                .or_default()
                .push(artist),
        }
    }

    let mut groups = Vec::new();
    for (name, mut copies) in originals {
        copies.sort_by_key(|artist| artist.id);
        let mut suffixed = numbered.remove(&name).unwrap_or_default();
        suffixed.sort_by_key(|(number, artist)| (*number, artist.id));

        let mut remove: Vec<LibraryArtist> = copies[1..].iter().map(|a| (*a).clone()).collect();
        remove.extend(suffixed.into_iter().map(|(_, artist)| artist.clone()));
        if remove.is_empty() {
            continue;
        }

        info!(
            target: "cleanup",
            artist = %copies[0].name,
            duplicates = remove.len(),
            "found duplicate artists"
        );
        groups.push(DuplicateGroup {
            keep: copies[0].clone(),
            remove,
        });
    }

    CleanupPlan { groups }
}

/// Deletes the planned duplicates one at a time, pausing between calls.
/// Failures are logged and counted; the remaining deletions still run.
pub async fn execute_cleanup(
    remover: &dyn ArtistRemover,
    plan: &CleanupPlan,
    dry_run: bool,
    pause: Duration,
    cancel: &CancellationToken,
) -> CleanupReport {
    let mut report = CleanupReport {
        planned: plan.total_removals(),
        dry_run,
        ..CleanupReport::default()
    };

    if dry_run {
        info!(target: "cleanup", planned = report.planned, "dry run: nothing deleted");
        return report;
    }

    'groups: for group in &plan.groups {
        for artist in &group.remove {
            if cancel.is_cancelled() {
                break 'groups;
            }
            match remover.delete_artist(artist.id, false).await {
                Ok(()) => {
                    info!(target: "cleanup", artist = %artist.name, id = artist.id, "removed duplicate");
                    report.removed += 1;
                }
                Err(err) => {
                    error!(target: "cleanup", artist = %artist.name, id = artist.id, error = %err, "failed to remove duplicate");
                    report.failed += 1;
                }
            }
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break 'groups,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }

    info!(
        target: "cleanup",
        removed = report.removed,
        failed = report.failed,
        "cleanup complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_infrastructure::{InMemoryLibraryRepository, LibraryRepository};

    fn artist(id: i64, name: &str) -> LibraryArtist {
        LibraryArtist {
            id,
            name: name.into(),
            mbid: None,
            genres: vec![],
        }
    }

    #[test]
    fn splits_numbered_suffix() {
        assert_eq!(numbered_suffix("Burial (2)"), Some(("Burial", 2)));
        assert_eq!(numbered_suffix("Burial(12)"), Some(("Burial", 12)));
        assert_eq!(numbered_suffix("Burial"), None);
        assert_eq!(numbered_suffix("(2)"), None);
    }

    #[test]
    fn comparison_ignores_case_quotes_and_leading_the() {
        assert_eq!(comparison_name("The  Beatles"), "beatles");
        assert_eq!(comparison_name("Guns N' Roses"), "guns n roses");
        assert_eq!(comparison_name("Theatre of Tragedy"), "theatre of tragedy");
    }

    #[test]
    fn plans_numbered_and_exact_duplicates() {
        let artists = vec![
            artist(5, "Burial"),
            artist(9, "Burial (3)"),
            artist(7, "Burial (2)"),
            artist(3, "The National"),
            artist(8, "National"),
            artist(4, "Orphan (2)"),
            artist(6, "Four Tet"),
        ];

        let plan = plan_duplicate_cleanup(&artists);
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.total_removals(), 3);

        let burial = &plan.groups[0];
        assert_eq!(burial.keep.id, 5);
        let removed: Vec<i64> = burial.remove.iter().map(|a| a.id).collect();
        assert_eq!(removed, vec![7, 9]);

        let national = &plan.groups[1];
        assert_eq!(national.keep.id, 3);
        assert_eq!(national.remove[0].id, 8);
    }

    #[tokio::test]
    async fn executes_plan_and_honours_dry_run() {
        let repo = InMemoryLibraryRepository::new(
            vec![artist(1, "Low"), artist(2, "Low (2)"), artist(3, "Low (3)")],
            vec![],
        );
        let plan = plan_duplicate_cleanup(&repo.list_artists().await.unwrap());
        let cancel = CancellationToken::new();

        let dry = execute_cleanup(&repo, &plan, true, Duration::ZERO, &cancel).await;
        assert_eq!((dry.planned, dry.removed), (2, 0));
        assert_eq!(repo.list_artists().await.unwrap().len(), 3);

        let report = execute_cleanup(&repo, &plan, false, Duration::ZERO, &cancel).await;
        assert_eq!((report.removed, report.failed), (2, 0));
        assert_eq!(repo.list_artists().await.unwrap().len(), 1);

        let again = execute_cleanup(&repo, &plan, false, Duration::ZERO, &cancel).await;
        assert_eq!(again.failed, 2);
    }
}
