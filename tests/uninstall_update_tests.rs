//! Integration tests for the uninstall and update workflows

mod common;

use appstore::services::{
    InstallId, InstallTarget, InstallationRecord, RestartType, UpdateTarget,
};
use common::{CondaInstall, CondaRemove, FakeTools, TestEnv, TOPIC};

fn texts(observer: &mut appstore::services::notification::ObserverHandle) -> Vec<String> {
    std::iter::from_fn(|| observer.try_recv())
        .filter_map(|m| m.message.as_text().map(str::to_string))
        .collect()
}

fn not_found() -> FakeTools {
    FakeTools {
        conda_remove: CondaRemove::NotFound,
        ..FakeTools::default()
    }
}

#[tokio::test]
async fn test_uninstall_removes_package_and_restarts() {
    let env = TestEnv::new();
    let mut observer = env.state.hub.subscribe(TOPIC);

    let (id, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert_eq!(env.calls("conda"), vec!["remove --yes --force demo_app"]);
    assert_eq!(
        env.calls("portal"),
        vec!["app_settings remove demo_app", "uninstall demo_app -f"]
    );

    let restarts = env.host.requests();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].restart_type, RestartType::Uninstall);
    assert_eq!(restarts[0].name, "demo_app");

    assert!(texts(&mut observer).contains(&"Uninstall completed. Restarting server...".to_string()));

    // Uninstalls keep a log but no status record
    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("is not assigned to demo_app"));
    assert!(!env.state.ledger().exists(&id));
}

#[tokio::test]
async fn test_unknown_package_removes_checkout_with_same_name() {
    let env = TestEnv::with_tools(not_found());
    let checkout = env.git_dir().join("demo_app");
    env.write_manifest(&checkout, "name: demo_app\n");

    let (_, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert!(!checkout.exists());
    assert_eq!(env.host.requests().len(), 1);
}

#[tokio::test]
async fn test_unknown_package_removes_checkout_declaring_the_name() {
    let env = TestEnv::with_tools(not_found());
    let checkout = env.git_dir().join("lab-tools");
    let unrelated = env.git_dir().join("other");
    env.write_manifest(&checkout, "name: demo_app\n");
    env.write_manifest(&unrelated, "name: other_app\n");

    let (_, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert!(!checkout.exists());
    assert!(unrelated.is_dir());
}

#[tokio::test]
async fn test_unknown_package_removes_checkout_from_install_record() {
    let env = TestEnv::with_tools(not_found());
    let checkout = env.git_dir().join("renamed");
    std::fs::create_dir_all(&checkout).unwrap();

    let target = InstallTarget::Repository {
        url: "https://git.example.com/lab/demo_app.git".to_string(),
        branch: "main".to_string(),
    };
    let record = InstallationRecord::new(InstallId::generate(), target, checkout.clone(), false);
    env.state.ledger().create(&record).unwrap();

    let (_, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert!(!checkout.exists());
}

#[tokio::test]
async fn test_uninstall_without_any_source_still_restarts() {
    let env = TestEnv::with_tools(not_found());

    let (id, handle) = env.state.installer.begin_uninstall("ghost_app").unwrap();
    assert!(handle.join().await);

    assert_eq!(env.host.requests().len(), 1);
    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("No source workspace found for 'ghost_app'"));
}

#[tokio::test]
async fn test_uninstall_restarts_when_the_checkout_cannot_be_removed() {
    let env = TestEnv::with_tools(not_found());
    let mut observer = env.state.hub.subscribe(TOPIC);
    let sibling = env.git_dir().join("other_app");
    std::fs::create_dir_all(&sibling).unwrap();

    // A record pointing at the source-control directory itself
    let target = InstallTarget::Repository {
        url: "https://git.example.com/lab/demo_app.git".to_string(),
        branch: "main".to_string(),
    };
    let record = InstallationRecord::new(
        InstallId::generate(),
        target,
        env.git_dir().to_path_buf(),
        false,
    );
    env.state.ledger().create(&record).unwrap();

    let (id, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert!(sibling.is_dir());
    let restarts = env.host.requests();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].restart_type, RestartType::Uninstall);

    let notes = texts(&mut observer);
    assert!(notes.contains(&"Could not remove the source files of demo_app.".to_string()));
    assert!(notes.contains(&"Uninstall completed. Restarting server...".to_string()));

    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("Refusing to remove"));
}

#[tokio::test]
async fn test_uninstall_restarts_when_the_package_manager_cannot_run() {
    let env = TestEnv::new();
    let mut observer = env.state.hub.subscribe(TOPIC);
    std::fs::remove_file(env.dir.path().join("bin").join("conda")).unwrap();

    let (id, handle) = env.state.installer.begin_uninstall("demo_app").unwrap();
    assert!(handle.join().await);

    assert_eq!(env.host.requests().len(), 1);
    let notes = texts(&mut observer);
    assert!(notes.contains(&"Package removal could not run. Continuing the uninstall.".to_string()));
    assert!(notes.contains(&"Uninstall completed. Restarting server...".to_string()));

    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("Package removal could not run"));
}

#[tokio::test]
async fn test_uninstall_rejects_unsafe_names() {
    let env = TestEnv::new();
    assert!(env.state.installer.begin_uninstall("../apps").is_err());
    assert!(env.calls("conda").is_empty());
}

fn update_to(version: &str) -> UpdateTarget {
    UpdateTarget {
        name: "demo_app".to_string(),
        channel: "chan".to_string(),
        label: "main".to_string(),
        version: version.to_string(),
    }
}

#[tokio::test]
async fn test_update_pins_version_and_restarts() {
    let env = TestEnv::new();
    let mut observer = env.state.hub.subscribe(TOPIC);
    env.state.cache.get().await.unwrap();
    assert!(env.state.cache.is_cached().await);

    let (_, handle) = env.state.installer.begin_update(update_to("2.0")).unwrap();
    assert!(handle.join().await);

    assert_eq!(env.calls("conda"), vec!["install --yes -c chan/label/main demo_app=2.0"]);
    let restarts = env.host.requests();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].restart_type, RestartType::Update);
    assert!(!env.state.cache.is_cached().await);
    assert!(texts(&mut observer).contains(&"Update completed. Restarting server...".to_string()));
}

#[tokio::test]
async fn test_failed_update_does_not_restart() {
    let env = TestEnv::with_tools(FakeTools {
        conda_install: CondaInstall::NotFound,
        ..FakeTools::default()
    });
    let mut observer = env.state.hub.subscribe(TOPIC);

    let (id, handle) = env.state.installer.begin_update(update_to("9.9")).unwrap();
    assert!(handle.join().await);

    assert!(env.host.requests().is_empty());
    let notes = texts(&mut observer);
    assert!(notes.iter().any(|n| n.starts_with("The update failed.")));
    let log = env.state.ledger().read_log(&id).unwrap();
    assert!(log.contains("Update failed: package not found"));
}
