// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::kits::{Kit, KitCatalog};
use crate::samples::{LoadState, SampleStore};

/// Severity level for a verification issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single verification issue found during checking.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub category: &'static str,
    pub kit: String,
    pub message: String,
}

/// Result of verifying a set of kits.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub issues: Vec<Issue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: VerificationReport) {
        self.issues.extend(other.issues);
    }
}

/// Loads a kit and reports every pad that failed to load or holds no audio.
pub async fn check_kit(kit: &Kit, store: &Arc<SampleStore>) -> Vec<Issue> {
    // Failures are read per pad below.
    let _ = store.load_kit(kit).await;

    let mut issues = Vec::new();
    for (pad, sample) in kit.samples().iter().enumerate() {
        let Some(handle) = store.handle(pad, kit.id()) else {
            continue;
        };
        let label = sample.label();
        match handle.state() {
            LoadState::Failed => issues.push(Issue {
                severity: Severity::Error,
                category: "sample-load",
                kit: kit.id().to_string(),
                message: match handle.error() {
                    Some(e) => format!("pad {} ({}): {}", pad, label, e),
                    None => format!("pad {} ({}) failed to load", pad, label),
                },
            }),
            LoadState::Ready if handle.sample().is_some_and(|s| s.frames() == 0) => {
                issues.push(Issue {
                    severity: Severity::Warning,
                    category: "sample-empty",
                    kit: kit.id().to_string(),
                    message: format!("pad {} ({}) \"{}\" holds no audio", pad, label, handle.locator()),
                })
            }
            _ => {}
        }
    }
    issues
}

/// Checks every kit in the catalog.
pub async fn check_all_kits(catalog: &KitCatalog, store: &Arc<SampleStore>) -> VerificationReport {
    let mut report = VerificationReport::default();
    for kit in catalog.kits() {
        report.issues.extend(check_kit(kit, store).await);
    }
    report
}

/// Prints a verification report grouped by kit.
pub fn print_report(report: &VerificationReport, catalog: &KitCatalog) {
    if report.is_clean() {
        println!("\u{2705} All {} kit(s) passed verification.", catalog.kits().len());
        return;
    }

    let mut by_kit: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in &report.issues {
        by_kit.entry(&issue.kit).or_default().push(issue);
    }

    let clean_count = catalog
        .kits()
        .iter()
        .filter(|kit| !by_kit.contains_key(kit.id()))
        .count();

    for (kit, issues) in &by_kit {
        let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
        let icon = if has_errors {
            "\u{274c}"
        } else {
            "\u{26a0}\u{fe0f} "
        };
        println!("{} {}", icon, kit);
        for issue in issues {
            let severity_icon = match issue.severity {
                Severity::Warning => "\u{26a0}\u{fe0f} ",
                Severity::Error => "\u{274c}",
            };
            println!(
                "   {} [{}] {}",
                severity_icon, issue.category, issue.message
            );
        }
    }

    if clean_count > 0 {
        println!("\n\u{2705} {} kit(s) passed all checks.", clean_count);
    }

    println!(
        "\nSummary: {} issue(s) found across {} kit(s).",
        report.issues.len(),
        by_kit.len()
    );
}
