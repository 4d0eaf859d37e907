use crate::config::Postprocess;
use anyhow::{Context, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Clean-up applied to markdown before it leaves the service.
///
/// Regex patterns are compiled once so a bad pattern fails at startup rather
/// than on the first request.
#[derive(Debug, Clone)]
pub struct Postprocessor {
    cfg: Postprocess,
    drop_lines: Vec<Regex>,
}

impl Postprocessor {
    pub fn new(cfg: &Postprocess) -> Result<Self> {
        let drop_lines = if cfg.remove_by_regex {
            cfg.regex
                .patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("postprocess regex: {p}")))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            cfg: cfg.clone(),
            drop_lines,
        })
    }

    pub fn apply(&self, markdown: String) -> String {
        let mut md = markdown;

        if self.cfg.normalize_newlines {
            md = md.replace("\r\n", "\n");
        }

        if self.cfg.normalize_unicode {
            md = md.nfkc().collect::<String>();
        }

        if self.cfg.sanitize_control_chars {
            md = sanitize_control_chars(&md);
        }

        if self.cfg.trim_trailing_whitespace {
            md = rejoin(&md, md.lines().map(str::trim_end));
        }

        if !self.drop_lines.is_empty() {
            md = rejoin(
                &md,
                md.lines()
                    .filter(|line| !self.drop_lines.iter().any(|r| r.is_match(line.trim()))),
            );
        }

        md
    }
}

/// Joins line-wise output, keeping the source's final newline.
fn rejoin<'a>(source: &str, lines: impl Iterator<Item = &'a str>) -> String {
    let mut out = lines.collect::<Vec<_>>().join("\n");
    if source.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

fn sanitize_control_chars(s: &str) -> String {
    s.chars()
        .filter(|&ch| {
            // Structural whitespace survives.
            if ch == '\n' || ch == '\t' {
                return true;
            }
            !ch.is_control()
        })
        .collect()
}
