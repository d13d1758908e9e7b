use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::RuntimePaths;

#[derive(Debug, Clone, Args)]
pub struct DiscoverArgs {
    /// Root of an extracted iOS backup or app container; defaults to the cwd.
    #[arg(long, value_name = "PATH")]
    pub backup_root: Option<PathBuf>,
}

pub fn run(args: &DiscoverArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let backup_root = match &args.backup_root {
        Some(path) => runtime_paths.resolve_input(path)?,
        None => runtime_paths.cwd.clone(),
    };
    println!(
        "discover: start backup_root={} out_dir={}",
        backup_root.display(),
        runtime_paths.out_dir.display()
    );

    println!("discover: stage scan_folders");
    let folders = crate::discovery::discover_conversation_folders(&backup_root)?;
    for folder in &folders {
        println!(
            "discover: folder path={} suffix={} default={} json_files={}",
            folder.path.display(),
            folder.suffix,
            folder.is_default,
            folder.json_files
        );
    }

    let documents = match crate::discovery::select_conversation_folder(&folders) {
        Some(folder) => {
            println!("discover: stage list_documents {}", folder.path.display());
            crate::discovery::list_conversation_documents(&folder.path)?
        }
        None => {
            println!("discover: no conversation folders found");
            Vec::new()
        }
    };

    let artifacts = crate::discovery::build_artifact_layout(&runtime_paths.out_dir);
    let artifact = crate::discovery::build_discovery_artifact(&backup_root, &folders, &documents);
    crate::discovery::write_discovery_artifact(&artifacts.discovery_json, &artifact)?;
    println!(
        "discover: complete folders={} selected={} documents={} guid_like={} artifact={}",
        artifact.total_folders,
        artifact.selected_folder.as_deref().unwrap_or("none"),
        artifact.total_documents,
        artifact.guid_like_documents,
        artifacts.discovery_json.display()
    );

    Ok(())
}
