//! Workspace dependency pre-flight checks.
//!
//! Before hosting a session the binary can verify that the files a
//! workspace needs are actually in place. Checkers live on a
//! [`CheckerRegistry`] built explicitly at composition time and handed to
//! whoever runs the checks; there is no global list and no runtime
//! discovery.

use std::fmt;
use std::path::{Path, PathBuf};

/// A file a checker expects to find under the workspace root.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub name: &'static str,
    pub relative_path: &'static str,
}

/// Outcome for one requirement.
#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
}

/// Outcome of one checker run. `Display` renders the per-file summary
/// lines, names padded to a column.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub checker: String,
    pub ok: bool,
    pub items: Vec<CheckItem>,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return writeln!(f, "no requirements");
        }

        let width = self
            .items
            .iter()
            .map(|item| item.name.len())
            .max()
            .unwrap_or(0);
        for item in &self.items {
            let status = if item.ok { "[DONE]" } else { "[MISSING]" };
            writeln!(f, "{:width$}\t{}", item.name, status)?;
        }
        Ok(())
    }
}

/// A named dependency check.
pub trait DependencyChecker {
    fn name(&self) -> &str;
    fn check(&self, root: &Path) -> CheckReport;
}

/// Checks that a fixed set of files exists under the root.
pub struct FileRequirementChecker {
    name: &'static str,
    requirements: Vec<Requirement>,
}

impl FileRequirementChecker {
    pub fn new(name: &'static str, requirements: Vec<Requirement>) -> Self {
        Self { name, requirements }
    }
}

impl DependencyChecker for FileRequirementChecker {
    fn name(&self) -> &str {
        self.name
    }

    fn check(&self, root: &Path) -> CheckReport {
        let items: Vec<CheckItem> = self
            .requirements
            .iter()
            .map(|requirement| CheckItem {
                name: requirement.name.to_string(),
                ok: root.join(requirement.relative_path).is_file(),
            })
            .collect();

        CheckReport {
            checker: self.name.to_string(),
            ok: items.iter().all(|item| item.ok),
            items,
        }
    }
}

/// Explicitly owned checker list.
#[derive(Default)]
pub struct CheckerRegistry {
    checkers: Vec<Box<dyn DependencyChecker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, checker: Box<dyn DependencyChecker>) {
        self.checkers.push(checker);
    }

    pub fn run_all(&self, root: &Path) -> Vec<CheckReport> {
        self.checkers
            .iter()
            .map(|checker| checker.check(root))
            .collect()
    }
}

/// The checkers wtty ships with: the uv Python toolchain files its home
/// workspace is expected to carry.
pub fn builtin_registry() -> CheckerRegistry {
    let mut registry = CheckerRegistry::new();
    registry.register(Box::new(FileRequirementChecker::new(
        "uv toolchain",
        vec![
            Requirement {
                name: "uv.exe",
                relative_path: "uv.exe",
            },
            Requirement {
                name: "uv.toml",
                relative_path: "uv.toml",
            },
            Requirement {
                name: "pyproject.toml",
                relative_path: "pyproject.toml",
            },
        ],
    )));
    registry
}

/// Sentinel files that mark a workspace root.
const ROOT_SENTINELS: [&str; 2] = ["pyproject.toml", "uv.toml"];

/// The workspace root the built-in checkers run against.
pub fn default_root() -> PathBuf {
    locate_root(&ROOT_SENTINELS)
}

/// Walk up from the current directory, then from the executable's
/// directory, looking for a directory containing one of `sentinels`.
/// Falls back to the current directory when nothing matches.
pub fn locate_root(sentinels: &[&str]) -> PathBuf {
    let current = std::env::current_dir().ok();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    for start in [current.clone(), exe_dir].into_iter().flatten() {
        if let Some(found) = find_containing_dir(&start, sentinels) {
            return found;
        }
    }
    current.unwrap_or_else(|| PathBuf::from("."))
}

fn find_containing_dir(start: &Path, sentinels: &[&str]) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(candidate) = dir {
        if sentinels
            .iter()
            .any(|sentinel| candidate.join(sentinel).is_file())
        {
            return Some(candidate.to_path_buf());
        }
        dir = candidate.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wtty-deps-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_files_fail_the_report() {
        let root = scratch_dir("missing");
        fs::write(root.join("uv.toml"), "").unwrap();

        let checker = FileRequirementChecker::new(
            "uv toolchain",
            vec![
                Requirement {
                    name: "uv.toml",
                    relative_path: "uv.toml",
                },
                Requirement {
                    name: "pyproject.toml",
                    relative_path: "pyproject.toml",
                },
            ],
        );
        let report = checker.check(&root);
        assert_eq!(report.checker, checker.name());
        assert!(!report.ok);
        assert!(report.items[0].ok);
        assert!(!report.items[1].ok);

        let text = report.to_string();
        assert!(text.contains("[DONE]"));
        assert!(text.contains("[MISSING]"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn registry_runs_every_checker() {
        let root = scratch_dir("registry");
        for file in ["uv.exe", "uv.toml", "pyproject.toml"] {
            fs::write(root.join(file), "").unwrap();
        }

        let reports = builtin_registry().run_all(&root);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].ok);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn locate_root_finds_sentinel_parents() {
        let root = scratch_dir("locate");
        fs::write(root.join("pyproject.toml"), "").unwrap();
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = find_containing_dir(&nested, &["pyproject.toml"]).unwrap();
        assert_eq!(found, root);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn empty_report_renders_placeholder() {
        let checker = FileRequirementChecker::new("nothing", Vec::new());
        let report = checker.check(Path::new("."));
        assert!(report.ok);
        assert_eq!(report.to_string(), "no requirements\n");
    }
}
