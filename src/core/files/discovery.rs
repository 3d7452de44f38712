use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use super::{FileManager, FileRecord};
use crate::core::error::CoreError;

/// One entry of the tool → regex table. `group` selects the capture that
/// holds the path.
struct ToolPattern {
    tool: &'static str,
    regex: Regex,
    group: usize,
}

/// Recognises filesystem artifacts in task output. The pattern table is the
/// single place new tools get wired in; executor code never changes for it.
pub struct FileDiscovery {
    files: Arc<FileManager>,
    patterns: Vec<ToolPattern>,
    fallback: Regex,
}

impl FileDiscovery {
    pub fn new(files: Arc<FileManager>) -> Self {
        let entry = |tool: &'static str, pattern: &str, group: usize| ToolPattern {
            tool,
            regex: compile(pattern),
            group,
        };

        FileDiscovery {
            files,
            patterns: vec![
                entry("yt-dlp", r"\[download\] Destination: (.+)", 1),
                entry(
                    "yt-dlp",
                    r"\[download\] (.+\.(?:mp4|mkv|webm|m4a|mp3|opus|flac))\s+has already been downloaded",
                    1,
                ),
                entry("yt-dlp", r#"\[ffmpeg\] Merging formats into "(.+)""#, 1),
                entry("wget", r#"saving to: ['"](.+)['"]"#, 1),
                entry("wget", r"'(.+)' saved \[\d+/\d+\]", 1),
                entry("gallery-dl", r"\[(.+)\] (.+\.[a-zA-Z0-9]+)$", 2),
                entry("ffmpeg", r"Output #0, .+, to '(.+)':", 1),
                entry("curl", r"% Total.+\s+(.+)$", 1),
            ],
            fallback: compile(r"([/\w\-.]+\.[a-zA-Z0-9]{2,4})"),
        }
    }

    /// Paths recognised in `output` for `tool`: pattern match, on-disk
    /// existence with size > 0, duplicates removed, input order preserved.
    pub fn discover(&self, tool: &str, output: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut discovered = Vec::new();

        for path in self.candidates(tool, output) {
            if !is_valid_file(&path) {
                continue;
            }
            if seen.insert(path.clone()) {
                discovered.push(path);
            }
        }
        discovered
    }

    /// Raw pattern matches, before any filesystem validation.
    fn candidates(&self, tool: &str, output: &[String]) -> Vec<String> {
        let tool_patterns: Vec<(&Regex, usize)> = self
            .patterns
            .iter()
            .filter(|p| p.tool == tool)
            .map(|p| (&p.regex, p.group))
            .collect();
        let patterns: Vec<(&Regex, usize)> = if tool_patterns.is_empty() {
            vec![(&self.fallback, 1)]
        } else {
            tool_patterns
        };

        let mut candidates = Vec::new();
        for line in output {
            let line = line.trim();
            if line.is_empty() || line.starts_with("[ERROR]") {
                continue;
            }
            for (regex, group) in &patterns {
                if let Some(captures) = regex.captures(line) {
                    if let Some(m) = captures.get(*group) {
                        candidates.push(m.as_str().trim_matches(['"', '\'']).to_string());
                    }
                }
            }
        }
        candidates
    }

    /// Discover and register in one pass. Only newly created records are
    /// returned, so a repeated feed of the same output produces nothing.
    pub async fn discover_and_register(
        &self,
        task_id: &str,
        tool: &str,
        output: &[String],
    ) -> Result<Vec<FileRecord>, CoreError> {
        let mut registered = Vec::new();
        for path in self.discover(tool, output) {
            match self.files.register_file_from_task(task_id, &path, None).await {
                Ok(registration) if registration.created => registered.push(registration.record),
                Ok(_) => {}
                Err(e) => {
                    warn!("failed to register file {path} for task {task_id}: {e}");
                }
            }
        }
        Ok(registered)
    }
}

fn is_valid_file(path: &str) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

fn compile(pattern: &str) -> Regex {
    // Table entries are literals; a failure here is a programming error.
    Regex::new(pattern).expect("discovery pattern must compile")
}
