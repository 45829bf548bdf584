//! Engine behaviour over the in-memory store

use arbor_tree::attributes;
use arbor_tree::prelude::*;
use arbor_tree::{MemoryStore, TrashBin};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

fn path(s: &str) -> VirtualPath {
    VirtualPath::new(s).unwrap()
}

fn at(s: &str) -> ResourceRef {
    ResourceRef::path(path(s))
}

fn ada() -> Principal {
    Principal::new(PrincipalId::new("42", "https://idp.example.org")).with_username("ada")
}

async fn engine() -> Engine {
    Engine::in_memory(EngineConfig::new("/var/tmp/arbor-test"))
        .await
        .unwrap()
}

async fn home_engine() -> Engine {
    Engine::in_memory(EngineConfig::new("/var/tmp/arbor-test").with_home("{id}"))
        .await
        .unwrap()
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn test_home_create_list_rename_scenario() {
    let engine = home_engine().await;
    let principal = ada();

    engine.create_home(&principal).await.unwrap();
    let home = engine.get_home(&principal).unwrap();
    assert!(home.to_string().ends_with("/42"));

    let docs = engine.create_dir(&path("/42/docs")).await.unwrap();

    let listing = engine.list_folder(&at("/42"), &[]).await.unwrap();
    let names: Vec<&str> = listing.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["docs"]);

    engine
        .move_node(&at("/42/docs"), &at("/42/documents"))
        .await
        .unwrap();

    let err = engine.get_md(&at("/42/docs"), &[]).await.unwrap_err();
    assert!(err.is_not_found());

    let info = engine.get_md(&at("/42/documents"), &[]).await.unwrap();
    assert_eq!(&info.id, docs.id());
    assert_eq!(info.path.to_string(), "/42/documents");
    engine.check_consistency().unwrap();
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_directory_conflicts() {
    let engine = engine().await;
    engine.create_dir(&path("/a")).await.unwrap();

    let err = engine.create_dir(&path("/a")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = engine.create_dir(&path("/missing/child")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_create_existing_node_rejected_by_tree() {
    let engine = engine().await;
    let a = engine.create_dir(&path("/a")).await.unwrap();
    let err = engine.tree().create_directory(&a).await.unwrap_err();
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn test_prospective_node_resolution() {
    let engine = engine().await;
    engine.create_dir(&path("/a")).await.unwrap();

    let node = engine.resolve(&at("/a/new")).await.unwrap();
    assert!(!node.exists());
    assert!(node.id().is_unassigned());
    assert_eq!(node.name(), "new");
    let a = engine.resolve(&at("/a")).await.unwrap();
    assert_eq!(node.parent_id(), Some(a.id()));
}

#[tokio::test]
async fn test_walk_through_file_is_rejected() {
    let engine = engine().await;
    engine.create_file(&path("/f")).await.unwrap();

    let err = engine.resolve(&at("/f/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = engine.list_folder(&at("/f"), &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_owner_is_inherited() {
    let engine = home_engine().await;
    engine.create_home(&ada()).await.unwrap();
    engine.create_dir(&path("/42/docs")).await.unwrap();

    let info = engine.get_md(&at("/42/docs"), &[]).await.unwrap();
    assert_eq!(info.owner, Some(ada().id));

    engine.create_dir(&path("/public")).await.unwrap();
    let info = engine.get_md(&at("/public"), &[]).await.unwrap();
    assert_eq!(info.owner, None);
}

// ============================================================================
// Paths and ids
// ============================================================================

#[tokio::test]
async fn test_id_path_round_trip() {
    let engine = engine().await;
    let mut ids = Vec::new();
    for p in ["/a", "/a/b", "/a/b/c", "/d"] {
        ids.push(engine.create_dir(&path(p)).await.unwrap().id().clone());
    }

    for id in ids {
        let p = engine.path_by_id(&id).unwrap();
        let node = engine.resolve(&ResourceRef::path(p)).await.unwrap();
        assert_eq!(node.id(), &id);
    }

    let unknown = NodeId::parse("no-such-node").unwrap();
    assert!(engine.path_by_id(&unknown).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_id_reference_with_sub_path() {
    let engine = engine().await;
    let a = engine.create_dir(&path("/a")).await.unwrap();
    let c = engine.create_dir(&path("/a/b/c").parent().unwrap()).await.unwrap();
    engine.create_dir(&path("/a/b/c")).await.unwrap();

    let by_id = ResourceRef::id_with_path(a.id().clone(), path("b"));
    let node = engine.resolve(&by_id).await.unwrap();
    assert_eq!(node.id(), c.id());

    // id references survive renames
    engine.move_node(&at("/a"), &at("/renamed")).await.unwrap();
    let node = engine.resolve(&by_id).await.unwrap();
    assert_eq!(node.id(), c.id());

    let parsed: ResourceRef = format!("id:{}/b/c", a.id()).parse().unwrap();
    let node = engine.resolve(&parsed).await.unwrap();
    assert_eq!(engine.path_by_id(node.id()).unwrap().to_string(), "/renamed/b/c");
}

// ============================================================================
// Move
// ============================================================================

#[tokio::test]
async fn test_move_keeps_id_across_parents() {
    let engine = engine().await;
    engine.create_dir(&path("/src")).await.unwrap();
    engine.create_dir(&path("/dst")).await.unwrap();
    let node = engine.create_dir(&path("/src/item")).await.unwrap();
    engine.create_dir(&path("/src/item/inner")).await.unwrap();

    let moved = engine
        .move_node(&at("/src/item"), &at("/dst/item2"))
        .await
        .unwrap();
    assert_eq!(moved.id(), node.id());
    assert_eq!(moved.name(), "item2");
    assert_eq!(
        engine.path_by_id(node.id()).unwrap().to_string(),
        "/dst/item2"
    );
    assert!(engine.get_md(&at("/dst/item2/inner"), &[]).await.is_ok());
    assert!(engine.list_folder(&at("/src"), &[]).await.unwrap().is_empty());

    let attrs = moved.attributes();
    assert_eq!(attrs.get_str(attributes::NAME).unwrap(), Some("item2"));
    engine.check_consistency().unwrap();
}

#[tokio::test]
async fn test_move_rejections() {
    let engine = engine().await;
    engine.create_dir(&path("/a")).await.unwrap();
    engine.create_dir(&path("/a/b")).await.unwrap();
    engine.create_dir(&path("/c")).await.unwrap();

    let err = engine.move_node(&at("/a"), &at("/a/b/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = engine.move_node(&at("/a"), &at("/c")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = engine.move_node(&at("/"), &at("/c/root")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = engine.move_node(&at("/nope"), &at("/c/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // onto itself
    let a = engine.move_node(&at("/a"), &at("/a")).await.unwrap();
    assert_eq!(engine.path_by_id(a.id()).unwrap().to_string(), "/a");
    engine.check_consistency().unwrap();
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_hands_subtree_to_trash() {
    let engine = engine().await;
    let a = engine.create_dir(&path("/a")).await.unwrap();
    let b = engine.create_dir(&path("/a/b")).await.unwrap();

    engine.delete(&at("/a")).await.unwrap();

    assert!(!engine.resolve(&at("/a")).await.unwrap().exists());
    assert!(engine.path_by_id(b.id()).unwrap_err().is_not_found());
    assert!(engine.resolve(&ResourceRef::id(a.id().clone())).await.unwrap_err().is_not_found());

    let item = engine.trash().get(a.id()).unwrap();
    assert_eq!(item.origin.to_string(), "/a");
    assert_eq!(item.name, "a");
    engine.check_consistency().unwrap();

    // the name is free again
    engine.create_dir(&path("/a")).await.unwrap();
}

#[tokio::test]
async fn test_delete_rejections() {
    let engine = engine().await;
    let err = engine.delete(&at("/")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = engine.delete(&at("/missing")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Listing and metadata
// ============================================================================

#[tokio::test]
async fn test_list_folder_sorted() {
    let engine = engine().await;
    for name in ["zeta", "alpha", "mid"] {
        engine.create_dir(&path("/").join(name).unwrap()).await.unwrap();
    }
    engine.create_file(&path("/file.txt")).await.unwrap();

    let listing = engine.list_folder(&at("/"), &[]).await.unwrap();
    let names: Vec<&str> = listing.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "file.txt", "mid", "zeta"]);
    assert_eq!(listing[1].resource_type, ResourceType::File);
    assert_eq!(listing[0].path.to_string(), "/alpha");
}

#[tokio::test]
async fn test_list_folder_skips_undecodable_child() {
    let store = Arc::new(MemoryStore::new());
    let trash = Arc::new(TrashBin::in_memory(store.clone()));
    let config = EngineConfig::new("/var/tmp/arbor-test");
    let engine = Engine::with_store(config, store.clone(), trash).await.unwrap();
    engine.create_dir(&path("/a")).await.unwrap();
    let broken = engine.create_dir(&path("/b")).await.unwrap();

    store
        .set(broken.id(), attributes::PARENT_ID, &[0xff, 0xfe])
        .await
        .unwrap();

    let listing = engine.list_folder(&at("/"), &[]).await.unwrap();
    let names: Vec<&str> = listing.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["a"]);
}

#[tokio::test]
async fn test_arbitrary_metadata() {
    let engine = engine().await;
    engine.create_dir(&path("/a")).await.unwrap();

    let mut md = BTreeMap::new();
    md.insert("color".to_string(), "blue".to_string());
    md.insert("tag".to_string(), "work".to_string());
    engine.set_arbitrary_metadata(&at("/a"), &md).await.unwrap();

    let info = engine.get_md(&at("/a"), &[]).await.unwrap();
    assert_eq!(info.metadata, md);

    let info = engine.get_md(&at("/a"), &["tag".to_string()]).await.unwrap();
    assert_eq!(info.metadata.len(), 1);

    engine
        .unset_arbitrary_metadata(&at("/a"), &["color".to_string(), "never-set".to_string()])
        .await
        .unwrap();
    let info = engine.get_md(&at("/a"), &["*".to_string()]).await.unwrap();
    assert_eq!(info.metadata.keys().collect::<Vec<_>>(), vec!["tag"]);

    let err = engine
        .set_arbitrary_metadata(&at("/missing"), &md)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_copy_metadata_skips_identity() {
    let engine = engine().await;
    engine.create_dir(&path("/a")).await.unwrap();
    engine.create_dir(&path("/b")).await.unwrap();
    let mut md = BTreeMap::new();
    md.insert("color".to_string(), "blue".to_string());
    engine.set_arbitrary_metadata(&at("/a"), &md).await.unwrap();

    engine.copy_metadata(&at("/a"), &at("/b")).await.unwrap();

    let b = engine.get_md(&at("/b"), &[]).await.unwrap();
    assert_eq!(b.metadata, md);
    assert_eq!(b.name, "b");
    engine.check_consistency().unwrap();
}

#[tokio::test]
async fn test_copy_metadata_keeps_aggregates_and_markers() {
    let store = Arc::new(MemoryStore::new());
    let trash = Arc::new(TrashBin::in_memory(store.clone()));
    let config = EngineConfig::new("/var/tmp/arbor-test")
        .with_tree_time_accounting(true)
        .with_tree_size_accounting(true);
    let engine = Engine::with_store(config, store.clone(), trash).await.unwrap();

    let source = engine.create_dir(&path("/a")).await.unwrap();
    let target = engine.create_dir(&path("/b")).await.unwrap();
    engine.record_content_change(&at("/a"), 100).await.unwrap();
    engine.tree().mark_propagation_root(&source).await.unwrap();
    store
        .set(source.id(), attributes::TRASH_ORIGIN, b"/old/a")
        .await
        .unwrap();
    let mut md = BTreeMap::new();
    md.insert("color".to_string(), "blue".to_string());
    engine.set_arbitrary_metadata(&at("/a"), &md).await.unwrap();

    engine.copy_metadata(&at("/a"), &at("/b")).await.unwrap();

    for key in [
        attributes::TREE_SIZE,
        attributes::PROPAGATION,
        attributes::TRASH_ORIGIN,
    ] {
        assert!(
            store.get_opt(target.id(), key).await.unwrap().is_none(),
            "{} was copied",
            key
        );
    }
    let b = engine.get_md(&at("/b"), &[]).await.unwrap();
    assert_eq!(b.metadata, md);
    assert_eq!(b.tree_size, None);
    assert!(!engine.resolve(&at("/b")).await.unwrap().is_propagation_root());
}

// ============================================================================
// References
// ============================================================================

#[tokio::test]
async fn test_create_reference() {
    let engine = engine().await;
    let target = Url::parse("cs3:/storage/remote-id").unwrap();

    let reference = engine
        .create_reference(&path("/Shares/x"), &target)
        .await
        .unwrap();
    assert!(reference.is_reference());

    let err = engine
        .create_reference(&path("/Shares/x"), &target)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = engine
        .create_reference(&path("/Other/x"), &target)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = engine
        .create_reference(&path("/Shares/x/y"), &target)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let info = engine.get_md(&at("/Shares/x"), &[]).await.unwrap();
    assert_eq!(info.resource_type, ResourceType::Reference);
    assert_eq!(info.target.as_deref(), Some("cs3:/storage/remote-id"));

    let err = engine.content_path(&at("/Shares/x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_reference_share_folder_is_configurable() {
    let config = EngineConfig::new("/var/tmp/arbor-test").with_share_folder("mounts/");
    let engine = Engine::in_memory(config).await.unwrap();
    let target = Url::parse("https://example.org/remote").unwrap();

    engine
        .create_reference(&path("/mounts/r"), &target)
        .await
        .unwrap();
    let err = engine
        .create_reference(&path("/Shares/r"), &target)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_reference_attribute_outside_share_folder_rejected() {
    let engine = engine().await;
    let root = engine.resolve(&at("/")).await.unwrap();
    let prospective = Node::prospective(root.id().clone(), "sneaky")
        .with_attribute(attributes::REFERENCE, "https://example.org");

    let err = engine.tree().create_directory(&prospective).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_reference_cannot_leave_share_folder() {
    let engine = engine().await;
    let target = Url::parse("cs3:/t").unwrap();
    engine.create_reference(&path("/Shares/x"), &target).await.unwrap();
    engine.create_dir(&path("/elsewhere")).await.unwrap();

    let err = engine
        .move_node(&at("/Shares/x"), &at("/elsewhere/x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(!engine.resolve(&at("/elsewhere/x")).await.unwrap().exists());

    // renaming inside the share folder is fine
    engine.move_node(&at("/Shares/x"), &at("/Shares/y")).await.unwrap();
    let info = engine.get_md(&at("/Shares/y"), &[]).await.unwrap();
    assert_eq!(info.resource_type, ResourceType::Reference);
}

#[tokio::test]
async fn test_share_folder_with_references_stays_put() {
    let engine = engine().await;
    let target = Url::parse("cs3:/t").unwrap();
    engine.create_reference(&path("/Shares/x"), &target).await.unwrap();
    engine.create_dir(&path("/elsewhere")).await.unwrap();

    let err = engine.move_node(&at("/Shares"), &at("/Other")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = engine
        .move_node(&at("/Shares"), &at("/elsewhere/Shares"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let info = engine.get_md(&at("/Shares/x"), &[]).await.unwrap();
    assert_eq!(info.resource_type, ResourceType::Reference);
    engine.check_consistency().unwrap();
}

#[tokio::test]
async fn test_reference_holds_no_entries() {
    let engine = engine().await;
    let target = Url::parse("cs3:/t").unwrap();
    engine.create_reference(&path("/Shares/x"), &target).await.unwrap();

    let err = engine.create_dir(&path("/Shares/x/sub")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    let err = engine.create_file(&path("/Shares/x/f")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert!(engine.list_folder(&at("/Shares/x"), &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_copy_metadata_does_not_spread_references() {
    let engine = engine().await;
    let target = Url::parse("cs3:/t").unwrap();
    engine.create_reference(&path("/Shares/x"), &target).await.unwrap();
    engine.create_dir(&path("/plain")).await.unwrap();

    engine.copy_metadata(&at("/Shares/x"), &at("/plain")).await.unwrap();

    let info = engine.get_md(&at("/plain"), &[]).await.unwrap();
    assert_eq!(info.resource_type, ResourceType::Container);
    assert_eq!(info.target, None);
}

// ============================================================================
// Homes
// ============================================================================

#[tokio::test]
async fn test_homes_disabled() {
    let engine = engine().await;
    assert_eq!(
        engine.create_home(&ada()).await.unwrap_err().kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(
        engine.get_home(&ada()).unwrap_err().kind(),
        ErrorKind::NotSupported
    );
}

#[tokio::test]
async fn test_nested_home_layout() {
    let config = EngineConfig::new("/var/tmp/arbor-test").with_home("users/{username}");
    let engine = Engine::in_memory(config).await.unwrap();

    let home = engine.create_home(&ada()).await.unwrap();
    assert_eq!(engine.path_by_id(home.id()).unwrap().to_string(), "/users/ada");
    assert_eq!(home.owner().unwrap(), Some(ada().id));

    // intermediate folders are not owned by the principal
    let users = engine.get_md(&at("/users"), &[]).await.unwrap();
    assert_eq!(users.owner, None);

    // idempotent
    let again = engine.create_home(&ada()).await.unwrap();
    assert_eq!(again.id(), home.id());
}

#[tokio::test]
async fn test_home_layout_needs_principal_fields() {
    let config = EngineConfig::new("/var/tmp/arbor-test").with_home("{mail}");
    let engine = Engine::in_memory(config).await.unwrap();
    let err = engine.create_home(&ada()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

// ============================================================================
// Content location
// ============================================================================

#[tokio::test]
async fn test_content_path_needs_location() {
    let engine = engine().await;
    engine.create_file(&path("/f")).await.unwrap();
    let err = engine.content_path(&at("/f")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_of_same_name() {
    let engine = Arc::new(engine().await);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_dir(&VirtualPath::new("/race").unwrap()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(e.is_already_exists()),
        }
    }
    assert_eq!(created, 1);
    engine.check_consistency().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_stay_acyclic() {
    let engine = Arc::new(engine().await);
    engine.create_dir(&path("/a")).await.unwrap();
    engine.create_dir(&path("/b")).await.unwrap();

    // a into b and b into a at the same time: at most one may win
    let e1 = engine.clone();
    let e2 = engine.clone();
    let t1 = tokio::spawn(async move { e1.move_node(&at("/a"), &at("/b/a")).await });
    let t2 = tokio::spawn(async move { e2.move_node(&at("/b"), &at("/a/b")).await });
    let results = [t1.await.unwrap(), t2.await.unwrap()];
    assert!(results.iter().filter(|r| r.is_ok()).count() <= 1);
    engine.check_consistency().unwrap();
}
