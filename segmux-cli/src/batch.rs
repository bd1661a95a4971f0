use crate::error::{AppError, Result};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

/// One line of a job file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub line: usize,
    pub url: String,
    pub name: Option<String>,
}

/// Hex MD5 of `url`, used as the per-video identifier.
pub fn url_fingerprint(url: &str) -> String {
    hex::encode(Md5::digest(url.as_bytes()))
}

/// Parse `<url> [name]` lines. Blank lines and `#` comments are skipped.
pub fn parse_jobs(text: &str) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (url, name) = match line.split_once(char::is_whitespace) {
            Some((url, rest)) => (url, Some(rest.trim())),
            None => (line, None),
        };
        url::Url::parse(url).map_err(|e| {
            AppError::InvalidInput(format!("line {}: bad URL '{url}': {e}", number + 1))
        })?;
        if let Some(name) = name
            && (name.contains('/') || name.contains('\\'))
        {
            return Err(AppError::InvalidInput(format!(
                "line {}: output name '{name}' must not contain a path separator",
                number + 1
            )));
        }

        jobs.push(Job {
            line: number + 1,
            url: url.to_string(),
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
        });
    }
    Ok(jobs)
}

/// Where a job's output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTarget {
    pub dir: PathBuf,
    pub name: String,
}

impl JobTarget {
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// With `fingerprint_dirs`, each job gets `<root>/<md5(url)>/` and unnamed
/// jobs use `default_name`; otherwise unnamed jobs are named `<md5(url)>.mp4`
/// so they cannot collide in the shared directory.
pub fn job_target(job: &Job, root: &Path, default_name: &str, fingerprint_dirs: bool) -> JobTarget {
    let fingerprint = url_fingerprint(&job.url);
    if fingerprint_dirs {
        JobTarget {
            dir: root.join(&fingerprint),
            name: job.name.clone().unwrap_or_else(|| default_name.to_string()),
        }
    } else {
        JobTarget {
            dir: root.to_path_buf(),
            name: job.name.clone().unwrap_or_else(|| format!("{fingerprint}.mp4")),
        }
    }
}
