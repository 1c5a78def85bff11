use std::path::Path;

use crate::cli::commands::InitArgs;
use crate::io::config_io;
use crate::io::file_store::{JsonFileStore, WORKFLOW_FILE};

/// Infer a workflow name from a directory name: separators become spaces,
/// words are title-cased.
fn infer_name(dir_name: &str) -> String {
    dir_name
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => {
                    let upper: String = c.to_uppercase().collect();
                    upper + chars.as_str()
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cmd_init(dir: &Path, args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    if dir.join(WORKFLOW_FILE).exists() {
        return Err(format!("{} already exists in {}", WORKFLOW_FILE, dir.display()).into());
    }

    let name = args.name.unwrap_or_else(|| {
        dir.file_name()
            .and_then(|n| n.to_str())
            .map(infer_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    for path in config_io::write_defaults(dir)? {
        println!("created {}", path.display());
    }
    let store = JsonFileStore::create(dir, &name)?;
    println!("created {}", store.path().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_from_directories() {
        assert_eq!(infer_name("nightly-sync"), "Nightly Sync");
        assert_eq!(infer_name("lead_router"), "Lead Router");
        assert_eq!(infer_name("--"), "");
    }
}
