//! Command handlers against an on-disk engine

use arbor_cli::{OutputFormat, PrincipalArgs, commands};
use arbor_core::EngineConfig;
use arbor_tree::{Engine, ResourceRef, VirtualPath};
use tempfile::TempDir;

async fn engine(temp_dir: &TempDir) -> Engine {
    let config = EngineConfig::new(temp_dir.path()).with_home("{id}");
    commands::open_engine(config).await.unwrap()
}

fn at(s: &str) -> ResourceRef {
    ResourceRef::path(VirtualPath::new(s).unwrap())
}

#[tokio::test]
async fn test_load_config_applies_root_override() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("arbor.toml");
    std::fs::write(&file, "root = \"/var/tmp/elsewhere\"\ntree_time_accounting = true\n").unwrap();

    let config = commands::load_config(Some(&file), Some(temp_dir.path().join("store")))
        .await
        .unwrap();
    assert_eq!(config.root, temp_dir.path().join("store"));
    assert!(config.tree_time_accounting);
}

#[tokio::test]
async fn test_load_config_reports_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing.toml");
    let err = commands::load_config(Some(&missing), None).await.unwrap_err();
    assert!(format!("{:#}", err).contains("missing.toml"));
}

#[tokio::test]
async fn test_mkdir_with_parents() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;

    commands::make_dir(&engine, "/a/b/c", true, OutputFormat::Json).await.unwrap();
    assert!(engine.resolve(&at("/a/b/c")).await.unwrap().exists());

    // existing ancestors are reused
    commands::make_dir(&engine, "/a/b/d", true, OutputFormat::Human).await.unwrap();
    assert_eq!(engine.list_folder(&at("/a/b"), &[]).await.unwrap().len(), 2);

    // without parents the intermediate must exist
    assert!(commands::make_dir(&engine, "/x/y", false, OutputFormat::Human).await.is_err());
}

#[tokio::test]
async fn test_mkdir_parents_refuses_file_ancestor() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    commands::touch(&engine, "/f", OutputFormat::Human).await.unwrap();

    let err = commands::make_dir(&engine, "/f/g", true, OutputFormat::Human)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a directory"));
}

#[tokio::test]
async fn test_metadata_commands() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    commands::make_dir(&engine, "/docs", false, OutputFormat::Human).await.unwrap();

    commands::set_metadata(&engine, "/docs", &["color=blue".to_string(), "tag=x".to_string()])
        .await
        .unwrap();
    commands::unset_metadata(&engine, "/docs", &["tag".to_string()]).await.unwrap();

    let info = engine.get_md(&at("/docs"), &[]).await.unwrap();
    assert_eq!(info.metadata.len(), 1);
    assert_eq!(info.metadata["color"], "blue");
}

#[tokio::test]
async fn test_home_and_trash_commands() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    let principal = PrincipalArgs {
        id: "42".to_string(),
        idp: "idp".to_string(),
        ..Default::default()
    };

    commands::create_home(&engine, principal.clone(), OutputFormat::Human).await.unwrap();
    commands::home_path(&engine, principal, OutputFormat::Json).unwrap();
    commands::make_dir(&engine, "/42/old", false, OutputFormat::Human).await.unwrap();
    commands::remove(&engine, "/42/old", OutputFormat::Human).await.unwrap();

    assert_eq!(engine.trash().len(), 1);
    commands::list_trash(&engine, OutputFormat::Human).unwrap();
    commands::check(&engine, OutputFormat::Json).unwrap();
}

#[tokio::test]
async fn test_move_and_path_by_id() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;
    commands::make_dir(&engine, "/a", false, OutputFormat::Human).await.unwrap();
    let id = engine.resolve(&at("/a")).await.unwrap().id().clone();

    commands::move_node(&engine, "/a", "/b", OutputFormat::Human).await.unwrap();
    assert_eq!(engine.path_by_id(&id).unwrap().to_string(), "/b");
    commands::path_of(&engine, id.as_str(), OutputFormat::Human).unwrap();

    assert!(commands::path_of(&engine, "a/b", OutputFormat::Human).is_err());
}

#[tokio::test]
async fn test_reference_command_validates_target() {
    let temp_dir = TempDir::new().unwrap();
    let engine = engine(&temp_dir).await;

    assert!(
        commands::create_reference(&engine, "/Shares/r", "not a url", OutputFormat::Human)
            .await
            .is_err()
    );
    commands::create_reference(&engine, "/Shares/r", "cs3:/remote/1", OutputFormat::Human)
        .await
        .unwrap();
    let info = engine.get_md(&at("/Shares/r"), &[]).await.unwrap();
    assert_eq!(info.target.as_deref(), Some("cs3:/remote/1"));
}
