use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;

/// One record from an SRG mapping file.
///
/// Field and method lines carry both owners: the obfuscated owner is the
/// path prefix of the source column, the mapped owner the prefix of the
/// destination column.
#[derive(Clone, Debug, PartialEq)]
pub enum SrgRecord {
    Class {
        old: String,
        new: String,
    },
    Field {
        owner: String,
        old: String,
        new: String,
    },
    Method {
        owner: String,
        old: String,
        descriptor: String,
        new: String,
    },
}

/// Parse a whole mapping file. Malformed or unknown lines are skipped with a
/// warning; a mapping that cannot be read at all is an error.
pub fn parse_srg_file(path: &Path) -> Result<Vec<SrgRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_srg(&content))
}

pub fn parse_srg(content: &str) -> Vec<SrgRecord> {
    let mut records = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        // Package renames only affect resource paths, which this pipeline
        // does not rewrite.
        if line.starts_with("PK:") {
            continue;
        }
        match parse_line(line) {
            Some(record) => records.push(record),
            None => warn!("skipping invalid mapping line: {line}"),
        }
    }
    records
}

fn parse_line(line: &str) -> Option<SrgRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    match parts[0] {
        "CL:" => Some(SrgRecord::Class {
            old: parts[1].to_string(),
            new: parts[2].to_string(),
        }),
        "FD:" => {
            let (owner, old) = split_member(parts[1])?;
            let (_, new) = split_member(parts[2])?;
            Some(SrgRecord::Field { owner, old, new })
        }
        "MD:" => {
            if parts.len() < 4 {
                return None;
            }
            let (owner, old) = split_member(parts[1])?;
            let (_, new) = split_member(parts[3])?;
            Some(SrgRecord::Method {
                owner,
                old,
                descriptor: parts[2].to_string(),
                new,
            })
        }
        _ => None,
    }
}

/// Split `path/to/Owner/member` at the last slash.
fn split_member(qualified: &str) -> Option<(String, String)> {
    let position = qualified.rfind('/')?;
    Some((
        qualified[..position].to_string(),
        qualified[position + 1..].to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_class_field_and_method_lines() {
        let records = parse_srg(
            "CL: a net/example/Widget\n\
             FD: a/b net/example/Widget/count\n\
             MD: a/c (I)V net/example/Widget/doThing\n",
        );

        assert_eq!(
            vec![
                SrgRecord::Class {
                    old: "a".to_string(),
                    new: "net/example/Widget".to_string(),
                },
                SrgRecord::Field {
                    owner: "a".to_string(),
                    old: "b".to_string(),
                    new: "count".to_string(),
                },
                SrgRecord::Method {
                    owner: "a".to_string(),
                    old: "c".to_string(),
                    descriptor: "(I)V".to_string(),
                    new: "doThing".to_string(),
                },
            ],
            records
        );
    }

    #[test]
    fn skips_malformed_and_unknown_lines() {
        let records = parse_srg(
            "CL: only-two\n\
             XX: a b c\n\
             MD: a/c (I)V\n\
             CL: a net/example/Widget\n",
        );

        assert_eq!(1, records.len());
    }

    #[test]
    fn package_lines_are_recognized_and_dropped() {
        let records = parse_srg("PK: ./ net/example\nCL: a net/example/Widget\n");
        assert_eq!(1, records.len());
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert!(parse_srg("\n   \n").is_empty());
    }
}
