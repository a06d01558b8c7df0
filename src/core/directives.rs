//! Directives embedded as comments in setup code.
//!
//! A setup file may carry lines such as `# @run-shell-script install.sh` or
//! `// @download-github-repo owner/repo`. They are scraped once, before the
//! provisioning stages run, into structured fields of the request.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::domain::RunRequest;

static SHELL_SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ #|/]* ?@run-shell-script (.*)$").expect("valid shell directive regex")
});

static GITHUB_REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ #|/]* ?@download-github-repo (.*)$")
        .expect("valid download directive regex")
});

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directives {
    pub shell_script: Option<String>,
    pub repo_ref: Option<String>,
}

/// Extracts the first occurrence of each directive from `setup`.
pub fn scrape(setup: &str) -> Directives {
    let capture = |re: &Regex| {
        re.captures(setup)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    Directives {
        shell_script: capture(&SHELL_SCRIPT_RE),
        repo_ref: capture(&GITHUB_REPO_RE),
    }
}

/// Applies scraped directives to the request. Fields set explicitly by the
/// caller win over directives.
///
/// Writes: `shell`, `github_repo`.
pub fn apply(request: &mut RunRequest) {
    let Some(setup) = request.setup.as_deref() else {
        return;
    };
    let directives = scrape(setup);

    if request.shell.is_none() {
        if let Some(script) = directives.shell_script {
            request.shell = Some(shell_invocation(request.work_dir(), &script));
        }
    }

    if request.github_repo.is_none() {
        request.github_repo = directives.repo_ref;
    }
}

fn shell_invocation(dir: &Path, script: &str) -> String {
    format!("cd {} ; sh {}", dir.display(), script)
}
